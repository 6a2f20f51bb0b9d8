//! Error types for message bus

use ledger_core::NodeId;
use thiserror::Error;

/// Message bus error
#[derive(Debug, Error)]
pub enum Error {
    /// Could not open an outbound connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Could not bind a listening port
    #[error("Bind error on port {port}: {source}")]
    Bind {
        /// Port that failed
        port: u16,
        /// Underlying socket error
        source: std::io::Error,
    },

    /// Outbound channel already closed (writer gone or transport shut down)
    #[error("Channel to {0} is closed")]
    ChannelClosed(String),

    /// No address known for the target node
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Inbound bytes are not a valid message
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message handler rejected the message
    #[error("Handler error: {0}")]
    Handler(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
