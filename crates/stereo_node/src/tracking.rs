//! Collaborator interfaces around the SLAM tracking engine.

use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

use crate::decode::DecodedFrame;
use crate::schemas::{CameraInfo, Header, TrackedPose, TrackingStatus};
use crate::transport::Transport;

/// Sensor configuration the engine is initialized for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    Monocular,
    #[default]
    Stereo,
    Rgbd,
}

impl fmt::Display for SensorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SensorMode::Monocular => "monocular",
            SensorMode::Stereo => "stereo",
            SensorMode::Rgbd => "rgbd",
        })
    }
}

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Engine not initialized")]
    NotInitialized,
    #[error("Unsupported sensor mode: {0}")]
    UnsupportedMode(SensorMode),
    #[error("Invalid calibration: {0}")]
    Calibration(String),
    #[error("Tracking failed: {0}")]
    Failed(String),
}

/// Camera pose in the map frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub translation: [f64; 3],
    /// Unit quaternion (x, y, z, w)
    pub rotation: [f64; 4],
}

/// Outcome of tracking one stereo pair
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedState {
    pub status: TrackingStatus,
    pub pose: Option<Pose>,
}

/// Tracked state tagged with the stamp of the pair it came from
#[derive(Debug, Clone, PartialEq)]
pub struct StampedState {
    /// Left frame acquisition time in nanoseconds
    pub stamp: u64,
    pub state: TrackedState,
}

/// Stereo tracking entry points consumed by the node.
///
/// The engine is not reentrant; the node owns it exclusively and calls it
/// from the dispatch context only.
pub trait TrackingEngine: Send {
    fn initialize(&mut self, mode: SensorMode, calibration: &CameraInfo)
        -> Result<(), TrackingError>;

    fn track_stereo(
        &mut self,
        left: &DecodedFrame,
        right: &DecodedFrame,
        timestamp: f64,
    ) -> Result<TrackedState, TrackingError>;

    /// Called once when the node tears the engine down
    fn shutdown(&mut self) {}
}

/// Post-tracking bookkeeping, run once per successfully tracked pair
pub trait StateUpdater: Send {
    fn publish_latest_state(&mut self);
}

/// Channel carrying the most recent tracked state from the pipeline to the updater
pub fn latest_state_channel() -> (
    watch::Sender<Option<StampedState>>,
    watch::Receiver<Option<StampedState>>,
) {
    watch::channel(None)
}

/// Engine used when no SLAM backend is linked.
///
/// Accepts every pair and reports `NotInitialized`, which is enough to bring
/// up cameras and check synchronization end to end.
pub struct NullEngine {
    mode: Option<SensorMode>,
    frames: u64,
    last_log: Instant,
    frames_at_last_log: u64,
}

impl Default for NullEngine {
    fn default() -> Self {
        Self {
            mode: None,
            frames: 0,
            last_log: Instant::now(),
            frames_at_last_log: 0,
        }
    }
}

impl NullEngine {
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl TrackingEngine for NullEngine {
    fn initialize(
        &mut self,
        mode: SensorMode,
        calibration: &CameraInfo,
    ) -> Result<(), TrackingError> {
        if mode != SensorMode::Stereo {
            return Err(TrackingError::UnsupportedMode(mode));
        }
        log::info!(
            "Null engine initialized: {} {}x{} ({})",
            mode,
            calibration.width,
            calibration.height,
            calibration.distortion_model
        );
        self.mode = Some(mode);
        Ok(())
    }

    fn track_stereo(
        &mut self,
        left: &DecodedFrame,
        right: &DecodedFrame,
        timestamp: f64,
    ) -> Result<TrackedState, TrackingError> {
        if self.mode.is_none() {
            return Err(TrackingError::NotInitialized);
        }
        self.frames += 1;

        if self.last_log.elapsed().as_secs() >= 1 {
            log::info!(
                "Null engine: {} pairs ({} in last period), t={:.3}s, {}x{} {} / {}x{} {}",
                self.frames,
                self.frames - self.frames_at_last_log,
                timestamp,
                left.width,
                left.height,
                left.encoding.name(),
                right.width,
                right.height,
                right.encoding.name()
            );
            self.frames_at_last_log = self.frames;
            self.last_log = Instant::now();
        }

        Ok(TrackedState {
            status: TrackingStatus::NotInitialized,
            pose: None,
        })
    }

    fn shutdown(&mut self) {
        log::info!("Null engine shut down after {} pairs", self.frames);
    }
}

fn get_pub_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Publishes the latest tracked state as a `TrackedPose` message
pub struct PosePublisher {
    transport: Arc<dyn Transport>,
    topic: String,
    frame_id: String,
    latest: watch::Receiver<Option<StampedState>>,
    sequence: u32,
}

impl PosePublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        topic: &str,
        frame_id: &str,
        latest: watch::Receiver<Option<StampedState>>,
    ) -> Self {
        log::info!("Publishing tracked pose to '{}'", topic);
        Self {
            transport,
            topic: topic.to_string(),
            frame_id: frame_id.to_string(),
            latest,
            sequence: 0,
        }
    }

    fn to_message(&self, stamped: &StampedState) -> TrackedPose {
        let (translation, rotation) = match stamped.state.pose {
            Some(pose) => (pose.translation.to_vec(), pose.rotation.to_vec()),
            None => (Vec::new(), Vec::new()),
        };
        TrackedPose {
            header: Some(Header {
                acq_time: stamped.stamp,
                pub_time: get_pub_time(),
                sequence: self.sequence,
                frame_id: self.frame_id.clone(),
            }),
            status: stamped.state.status as i32,
            translation,
            rotation,
        }
    }
}

impl StateUpdater for PosePublisher {
    fn publish_latest_state(&mut self) {
        let Some(stamped) = self.latest.borrow_and_update().clone() else {
            return;
        };

        let msg = self.to_message(&stamped);
        match self.transport.put(&self.topic, msg.encode_to_vec()) {
            Ok(()) => self.sequence = self.sequence.wrapping_add(1),
            Err(e) => log::warn!("Failed to publish pose to '{}': {}", self.topic, e),
        }
    }
}
