//! Error types for the bank node

use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Node errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger_core::Error),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] message_bus::Error),

    /// Snapshot error
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] snapshot::Error),

    /// Configuration or topology error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message rejected before touching any state
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

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
