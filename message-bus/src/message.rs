//! Message envelope exchanged between bank nodes
//!
//! On the wire a message is one JSON object per line:
//!
//! ```text
//! {"from":2,"type":"CREDIT","numData":20000}
//! {"strData":"","numData":0,"type":"MARKER","from":-1}
//! ```

use crate::types::MessageType;
use ledger_core::{Amount, NodeId};
use serde::{Deserialize, Serialize};

/// Message envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending node, [`NodeId::EXTERNAL`] for operator triggers
    pub from: NodeId,

    /// Message type
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Amount for CREDIT/DEBIT, snapshot id for MARKER/GLOBAL_STATE
    #[serde(rename = "numData", default)]
    pub num_data: i64,

    /// Formatted snapshot report (GLOBAL_STATE only)
    #[serde(rename = "strData", default, skip_serializing_if = "Option::is_none")]
    pub str_data: Option<String>,
}

impl Message {
    /// Create new message
    pub fn new(from: NodeId, message_type: MessageType, num_data: i64) -> Self {
        Self {
            from,
            message_type,
            num_data,
            str_data: None,
        }
    }

    /// Money sent to the receiver
    pub fn credit(from: NodeId, amount: Amount) -> Self {
        Self::new(from, MessageType::Credit, amount as i64)
    }

    /// Ask the receiver to pay `amount` back to the sender
    pub fn debit(from: NodeId, amount: Amount) -> Self {
        Self::new(from, MessageType::Debit, amount as i64)
    }

    /// Marker for the given snapshot
    pub fn marker(from: NodeId, snapshot_id: i64) -> Self {
        Self::new(from, MessageType::Marker, snapshot_id)
    }

    /// Operator trigger: a marker with no real sender starts a new snapshot
    pub fn trigger() -> Self {
        Self::marker(NodeId::EXTERNAL, 0)
    }

    /// Per-node snapshot report for the collector
    pub fn global_state(from: NodeId, snapshot_id: i64, report: String) -> Self {
        Self {
            from,
            message_type: MessageType::GlobalState,
            num_data: snapshot_id,
            str_data: Some(report),
        }
    }

    /// Serialize to one wire line, newline included
    pub fn to_line(&self) -> crate::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::credit(NodeId::new(2), 20_000);

        assert_eq!(msg.message_type, MessageType::Credit);
        assert_eq!(msg.from, NodeId::new(2));
        assert_eq!(msg.num_data, 20_000);
        assert!(msg.str_data.is_none());
    }

    #[test]
    fn test_wire_field_names() {
        let line = Message::debit(NodeId::new(1), 15_000).to_line().unwrap();

        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["from"], 1);
        assert_eq!(value["type"], "DEBIT");
        assert_eq!(value["numData"], 15_000);
        assert!(value.get("strData").is_none());
    }

    #[test]
    fn test_operator_trigger_decodes() {
        let raw = br#"{"strData":"","numData":0,"type":"MARKER","from":-1}"#;
        let msg = Message::from_bytes(raw).unwrap();

        assert_eq!(msg.message_type, MessageType::Marker);
        assert!(msg.from.is_external());
        assert_eq!(msg.num_data, 0);
        assert_eq!(msg.str_data.as_deref(), Some(""));
    }

    #[test]
    fn test_global_state_keeps_report() {
        let msg = Message::global_state(NodeId::new(3), 65536, "report".to_string());
        let line = msg.to_line().unwrap();
        let decoded = Message::from_bytes(line.trim_end().as_bytes()).unwrap();

        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_unknown_type_is_decode_error() {
        let raw = br#"{"from":1,"type":"FOO","numData":10}"#;
        assert!(matches!(
            Message::from_bytes(raw),
            Err(crate::Error::Decode(_))
        ));
    }

    #[test]
    fn test_missing_type_is_decode_error() {
        let raw = br#"{"from":1,"numData":10}"#;
        assert!(matches!(
            Message::from_bytes(raw),
            Err(crate::Error::Decode(_))
        ));
    }
}
