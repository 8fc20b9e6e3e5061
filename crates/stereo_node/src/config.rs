use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::sync::SyncPolicy;
use crate::tracking::SensorMode;
use crate::transport::topic_key;

/// Pixel layout handed to the tracking engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderOutput {
    /// Keep the encoding of the incoming message (row padding removed)
    #[default]
    Passthrough,
    /// Convert every frame to 8-bit grayscale
    Mono8,
}

/// Frame decoder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub output: DecoderOutput,
}

/// Approximate-time synchronizer tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Unmatched messages kept per stream before the oldest is evicted
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Maximum stamp difference, in milliseconds, between paired frames
    #[serde(default = "default_tolerance_ms")]
    pub tolerance_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
            tolerance_ms: default_tolerance_ms(),
        }
    }
}

impl SyncConfig {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            queue_size: self.queue_size,
            tolerance: Duration::from_millis(self.tolerance_ms),
        }
    }
}

fn default_queue_size() -> usize {
    10
}

fn default_tolerance_ms() -> u64 {
    20
}

fn default_left_image_topic() -> String {
    "/camera_left/image_raw".to_string()
}

fn default_right_image_topic() -> String {
    "/camera_right/image_raw".to_string()
}

fn default_camera_info_topic() -> String {
    "/camera/fisheye1/camera_info".to_string()
}

fn default_pose_topic() -> String {
    "/stereo/pose".to_string()
}

fn default_camera_info_timeout_ms() -> u64 {
    5000
}

fn default_dispatch_queue_size() -> usize {
    64
}

/// Root configuration of the stereo node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StereoConfig {
    /// Topic carrying the left camera images
    #[serde(default = "default_left_image_topic")]
    pub left_image_topic: String,
    /// Topic carrying the right camera images
    #[serde(default = "default_right_image_topic")]
    pub right_image_topic: String,
    /// Topic supplying calibration for the tracking engine
    #[serde(default = "default_camera_info_topic")]
    pub camera_info_topic: String,
    /// Topic the latest tracked pose is published to
    #[serde(default = "default_pose_topic")]
    pub pose_topic: String,
    /// Sensor mode the tracking engine is initialized with
    #[serde(default)]
    pub tracking_mode: SensorMode,
    /// How long startup waits for a calibration message
    #[serde(default = "default_camera_info_timeout_ms")]
    pub camera_info_timeout_ms: u64,
    /// Capacity of the queue between transport callbacks and the dispatch loop
    #[serde(default = "default_dispatch_queue_size")]
    pub dispatch_queue_size: usize,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            left_image_topic: default_left_image_topic(),
            right_image_topic: default_right_image_topic(),
            camera_info_topic: default_camera_info_topic(),
            pose_topic: default_pose_topic(),
            tracking_mode: SensorMode::default(),
            camera_info_timeout_ms: default_camera_info_timeout_ms(),
            dispatch_queue_size: default_dispatch_queue_size(),
            sync: SyncConfig::default(),
            decoder: DecoderConfig::default(),
        }
    }
}

impl StereoConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn camera_info_timeout(&self) -> Duration {
        Duration::from_millis(self.camera_info_timeout_ms)
    }

    /// Check the settings the node relies on before touching the transport
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, topic) in [
            ("left_image_topic", &self.left_image_topic),
            ("right_image_topic", &self.right_image_topic),
            ("camera_info_topic", &self.camera_info_topic),
            ("pose_topic", &self.pose_topic),
        ] {
            if topic_key(topic).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }

        if topic_key(&self.left_image_topic) == topic_key(&self.right_image_topic) {
            return Err(ConfigError::ValidationError(format!(
                "left and right image topics must differ (both '{}')",
                self.left_image_topic
            )));
        }

        if self.tracking_mode != SensorMode::Stereo {
            return Err(ConfigError::ValidationError(format!(
                "tracking_mode '{}' is not supported by the stereo node",
                self.tracking_mode
            )));
        }

        if self.sync.queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "sync.queue_size must be at least 1".to_string(),
            ));
        }
        if self.sync.tolerance_ms == 0 {
            return Err(ConfigError::ValidationError(
                "sync.tolerance_ms must be greater than 0".to_string(),
            ));
        }
        if self.dispatch_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch_queue_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
