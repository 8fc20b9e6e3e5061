//! Error types for the stereo node.

use thiserror::Error;

use crate::config::ConfigError;
use crate::node::NodeState;
use crate::tracking::TrackingError;

/// Errors that abort node setup or a lifecycle transition.
///
/// Per-pair failures (decode, tracking, sync misses) never surface here; they
/// are logged and counted by the pipeline instead.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration missing, unparsable or invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Lifecycle method called in the wrong state
    #[error("Invalid state: expected {expected}, node is {actual}")]
    InvalidState {
        expected: NodeState,
        actual: NodeState,
    },

    /// Failed to declare a subscription on the transport
    #[error("Failed to subscribe to '{topic}': {reason}")]
    Subscription { topic: String, reason: String },

    /// Camera calibration could not be acquired
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Tracking engine rejected initialization
    #[error("Tracking engine error: {0}")]
    Tracking(#[from] TrackingError),

    /// Zenoh communication error
    #[error("Zenoh error: {0}")]
    Zenoh(String),

    /// Generic I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zenoh::Error> for NodeError {
    fn from(err: zenoh::Error) -> Self {
        NodeError::Zenoh(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
