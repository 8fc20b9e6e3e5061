//! Stereo image ingestion front-end for visual SLAM.
//!
//! Subscribes to a left and a right camera stream, pairs frames by
//! approximate timestamp, decodes each pair into packed pixel buffers and
//! hands it to a tracking engine together with the left frame's timestamp.
//!
//! ```text
//! transport → StreamSubscriber ×2 → dispatch queue → ApproximateTimeSync
//!           → PairProcessor (decode ×2 → TrackingEngine → StateUpdater)
//! ```

pub mod calibration;
pub mod config;
pub mod decode;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod runtime;
pub mod schemas;
pub mod subscriber;
pub mod sync;
pub mod tracking;
pub mod transport;

pub use config::{ConfigError, DecoderOutput, StereoConfig, SyncConfig};
pub use decode::{DecodeError, DecodedFrame, FrameDecoder, ImageDecoder, PixelEncoding};
pub use error::NodeError;
pub use node::{NodeState, StereoNode};
pub use runtime::ProcessRuntime;
pub use sync::{ApproximateTimeSync, Stamped, StreamSide, SyncPolicy, SyncStats};
pub use tracking::{
    NullEngine, PosePublisher, SensorMode, StateUpdater, TrackedState, TrackingEngine,
    TrackingError,
};
pub use transport::{LocalTransport, Transport, ZenohTransport};
