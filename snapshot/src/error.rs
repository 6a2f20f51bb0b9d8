//! Error types for the snapshot engine

use thiserror::Error;

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, Error>;

/// Snapshot errors
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error (connect, enqueue)
    #[error("Transport error: {0}")]
    Transport(#[from] message_bus::Error),

    /// GLOBAL_STATE payload missing or unreadable
    #[error("Malformed report: {0}")]
    MalformedReport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
