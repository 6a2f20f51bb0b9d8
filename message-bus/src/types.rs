//! Type definitions for message bus

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type
///
/// Serialized as the upper-case tag used on the wire. Any other tag fails
/// to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Money moving to the receiver (sender already debited itself)
    Credit,
    /// Request for the receiver to pay the sender
    Debit,
    /// Chandy-Lamport marker, `numData` carries the snapshot id
    Marker,
    /// Finished per-node snapshot report, sent to the collector
    GlobalState,
}

impl MessageType {
    /// Wire tag, also used as the metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Credit => "CREDIT",
            MessageType::Debit => "DEBIT",
            MessageType::Marker => "MARKER",
            MessageType::GlobalState => "GLOBAL_STATE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
