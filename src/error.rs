//! Error types for the tracking node

use crate::processing::decoder::DecodeError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Tracking node error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed or serialized
    #[error("Config error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV input or output failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// OSC packet could not be decoded or encoded
    #[error("OSC error: {0}")]
    Decode(#[from] DecodeError),

    /// UDP socket could not be bound
    #[error("Failed to bind {address}:{port}: {source}")]
    Bind {
        address: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Listener thread did not exit in time
    #[error("Listener on port {port} did not stop within {timeout_ms} ms")]
    JoinTimeout { port: u16, timeout_ms: u64 },

    /// No tracker with this name
    #[error("Tracker not found: {0}")]
    TrackerNotFound(String),

    /// A tracker with this name already exists
    #[error("Tracker already exists: {0}")]
    DuplicateTracker(String),

    /// Another tracker already listens on this port
    #[error("Port {0} is already used by another tracker")]
    PortInUse(u16),

    /// Source limit reached
    #[error("Cannot add more than {0} tracking sources")]
    TooManyTrackers(usize),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
