use thiserror::Error;

use crate::config::DecoderOutput;
use crate::schemas::RawImage;

/// Errors that can occur while decoding an image message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unsupported encoding '{0}'")]
    UnsupportedEncoding(String),
    #[error("Empty image ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("Row step {step} is smaller than {min} bytes")]
    StepTooSmall { step: u32, min: u32 },
    #[error("Truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("Image geometry {width}x{height} overflows the addressable size")]
    GeometryOverflow { width: u32, height: u32 },
    #[error("Image has no header")]
    MissingHeader,
}

/// Pixel layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    Mono8,
    /// 16-bit grayscale, little-endian
    Mono16,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

impl PixelEncoding {
    /// Parse a ROS-style encoding name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "mono8" | "8UC1" => Some(Self::Mono8),
            "mono16" | "16UC1" => Some(Self::Mono16),
            "rgb8" => Some(Self::Rgb8),
            "bgr8" | "8UC3" => Some(Self::Bgr8),
            "rgba8" => Some(Self::Rgba8),
            "bgra8" | "8UC4" => Some(Self::Bgra8),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mono8 => "mono8",
            Self::Mono16 => "mono16",
            Self::Rgb8 => "rgb8",
            Self::Bgr8 => "bgr8",
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
            Self::Rgb8 | Self::Bgr8 => 3,
            Self::Rgba8 | Self::Bgra8 => 4,
        }
    }
}

/// A packed pixel buffer ready for the tracking engine
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Row-major pixels without row padding
    pub data: Vec<u8>,
    pub encoding: PixelEncoding,
    pub width: u32,
    pub height: u32,
    /// Acquisition time in nanoseconds
    pub stamp: u64,
}

impl DecodedFrame {
    /// Get the row stride (bytes per row)
    pub fn step(&self) -> usize {
        (self.width as usize).saturating_mul(self.encoding.bytes_per_pixel() as usize)
    }

    /// Acquisition time in seconds
    pub fn timestamp_secs(&self) -> f64 {
        self.stamp as f64 / 1e9
    }
}

/// Converts transport image messages into pixel buffers
pub trait FrameDecoder: Send {
    fn decode(&self, image: &RawImage) -> Result<DecodedFrame, DecodeError>;
}

/// Decoder for uncompressed images
///
/// Validates geometry against the payload, strips row padding, normalizes
/// 16-bit data to little-endian and optionally converts to grayscale.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder {
    output: DecoderOutput,
}

impl ImageDecoder {
    pub fn new(output: DecoderOutput) -> Self {
        Self { output }
    }

    fn pack(image: &RawImage, encoding: PixelEncoding) -> Result<Vec<u8>, DecodeError> {
        if image.width == 0 || image.height == 0 {
            return Err(DecodeError::EmptyImage {
                width: image.width,
                height: image.height,
            });
        }

        let overflow = || DecodeError::GeometryOverflow {
            width: image.width,
            height: image.height,
        };
        let row_bytes = image
            .width
            .checked_mul(encoding.bytes_per_pixel())
            .ok_or_else(overflow)?;
        if image.step < row_bytes {
            return Err(DecodeError::StepTooSmall {
                step: image.step,
                min: row_bytes,
            });
        }

        // The last row may omit its padding
        let step = image.step as usize;
        let row_bytes = row_bytes as usize;
        let height = image.height as usize;
        let expected = step
            .checked_mul(height - 1)
            .and_then(|n| n.checked_add(row_bytes))
            .ok_or_else(overflow)?;
        if image.data.len() < expected {
            return Err(DecodeError::Truncated {
                expected,
                actual: image.data.len(),
            });
        }

        let packed_len = row_bytes.checked_mul(height).ok_or_else(overflow)?;
        let mut data = Vec::with_capacity(packed_len);
        for row in image.data.chunks(step).take(height) {
            data.extend_from_slice(&row[..row_bytes]);
        }

        if encoding == PixelEncoding::Mono16 && image.is_bigendian {
            for px in data.chunks_exact_mut(2) {
                px.swap(0, 1);
            }
        }

        Ok(data)
    }
}

impl FrameDecoder for ImageDecoder {
    fn decode(&self, image: &RawImage) -> Result<DecodedFrame, DecodeError> {
        let header = image.header.as_ref().ok_or(DecodeError::MissingHeader)?;
        let encoding = PixelEncoding::from_name(&image.encoding)
            .ok_or_else(|| DecodeError::UnsupportedEncoding(image.encoding.clone()))?;

        let data = Self::pack(image, encoding)?;
        let (data, encoding) = match self.output {
            DecoderOutput::Passthrough => (data, encoding),
            DecoderOutput::Mono8 => (to_mono8(&data, encoding), PixelEncoding::Mono8),
        };

        Ok(DecodedFrame {
            data,
            encoding,
            width: image.width,
            height: image.height,
            stamp: header.acq_time,
        })
    }
}

/// BT.601 luma with integer weights
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32 + 128) >> 8) as u8
}

fn to_mono8(data: &[u8], encoding: PixelEncoding) -> Vec<u8> {
    match encoding {
        PixelEncoding::Mono8 => data.to_vec(),
        PixelEncoding::Mono16 => data
            .chunks_exact(2)
            .map(|px| (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8)
            .collect(),
        PixelEncoding::Rgb8 => data.chunks_exact(3).map(|p| luma(p[0], p[1], p[2])).collect(),
        PixelEncoding::Bgr8 => data.chunks_exact(3).map(|p| luma(p[2], p[1], p[0])).collect(),
        PixelEncoding::Rgba8 => data.chunks_exact(4).map(|p| luma(p[0], p[1], p[2])).collect(),
        PixelEncoding::Bgra8 => data.chunks_exact(4).map(|p| luma(p[2], p[1], p[0])).collect(),
    }
}
