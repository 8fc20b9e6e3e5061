//! Protobuf messages exchanged over the transport.
//!
//! Field numbering follows the camera schemas used by the capture nodes, so a
//! `RawImage` published by a camera node decodes here unchanged.

/// Common message header
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    /// Acquisition time in nanoseconds
    #[prost(uint64, tag = "1")]
    pub acq_time: u64,
    /// Publication time in nanoseconds
    #[prost(uint64, tag = "2")]
    pub pub_time: u64,
    #[prost(uint32, tag = "3")]
    pub sequence: u32,
    #[prost(string, tag = "4")]
    pub frame_id: ::prost::alloc::string::String,
}

/// Uncompressed image, laid out like `sensor_msgs/Image`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RawImage {
    #[prost(message, optional, tag = "1")]
    pub header: ::core::option::Option<Header>,
    #[prost(uint32, tag = "2")]
    pub width: u32,
    #[prost(uint32, tag = "3")]
    pub height: u32,
    /// Pixel encoding name (`mono8`, `bgr8`, ...)
    #[prost(string, tag = "4")]
    pub encoding: ::prost::alloc::string::String,
    /// Bytes per row, including padding
    #[prost(uint32, tag = "5")]
    pub step: u32,
    #[prost(bytes = "vec", tag = "6")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "7")]
    pub is_bigendian: bool,
}

/// Camera calibration, laid out like `sensor_msgs/CameraInfo`
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CameraInfo {
    #[prost(message, optional, tag = "1")]
    pub header: ::core::option::Option<Header>,
    #[prost(uint32, tag = "2")]
    pub width: u32,
    #[prost(uint32, tag = "3")]
    pub height: u32,
    #[prost(string, tag = "4")]
    pub distortion_model: ::prost::alloc::string::String,
    /// Distortion coefficients
    #[prost(double, repeated, tag = "5")]
    pub d: ::prost::alloc::vec::Vec<f64>,
    /// 3x3 intrinsic matrix, row-major
    #[prost(double, repeated, tag = "6")]
    pub k: ::prost::alloc::vec::Vec<f64>,
    /// 3x3 rectification matrix, row-major
    #[prost(double, repeated, tag = "7")]
    pub r: ::prost::alloc::vec::Vec<f64>,
    /// 3x4 projection matrix, row-major
    #[prost(double, repeated, tag = "8")]
    pub p: ::prost::alloc::vec::Vec<f64>,
}

/// Tracking status reported by the engine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TrackingStatus {
    NotInitialized = 0,
    Ok = 1,
    Lost = 2,
}

/// Latest tracking outcome published after each tracked pair
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TrackedPose {
    #[prost(message, optional, tag = "1")]
    pub header: ::core::option::Option<Header>,
    #[prost(enumeration = "TrackingStatus", tag = "2")]
    pub status: i32,
    /// Camera position (x, y, z); empty when no pose is available
    #[prost(double, repeated, tag = "3")]
    pub translation: ::prost::alloc::vec::Vec<f64>,
    /// Camera orientation quaternion (x, y, z, w); empty when no pose is available
    #[prost(double, repeated, tag = "4")]
    pub rotation: ::prost::alloc::vec::Vec<f64>,
}
