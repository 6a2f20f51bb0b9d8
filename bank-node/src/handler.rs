//! Inbound message dispatch
//!
//! Every listener of a node shares one [`NodeHandler`]. Messages are checked
//! before they reach the ledger or the snapshot table; anything rejected
//! here leaves both untouched.

use async_trait::async_trait;
use ledger_core::{Amount, AmountRange, NodeId};
use message_bus::{ChannelKind, Message, MessageHandler, MessageType, PortLayout};
use snapshot::{Collector, MarkerOutcome, SnapshotEngine, SnapshotId};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handler behind every listening port of one node
#[derive(Debug)]
pub struct NodeHandler {
    node: NodeId,
    layout: PortLayout,
    amounts: AmountRange,
    engine: Arc<SnapshotEngine>,
    collector: Option<Arc<Collector>>,
}

impl NodeHandler {
    /// Create new handler
    pub fn new(
        layout: PortLayout,
        amounts: AmountRange,
        engine: Arc<SnapshotEngine>,
        collector: Option<Arc<Collector>>,
    ) -> Self {
        Self {
            node: engine.node(),
            layout,
            amounts,
            engine,
            collector,
        }
    }

    /// Process one message that arrived on `port`
    pub async fn dispatch(&self, port: u16, message: Message) -> crate::Result<()> {
        match message.message_type {
            MessageType::Marker if message.from.is_external() => {
                let id = self.engine.initiate().await?;
                info!(node = %self.node, port, snapshot = %id, "Snapshot triggered by operator");
            }
            MessageType::Marker => {
                self.check_channel(port, &message, ChannelKind::Transfer)?;
                let id = SnapshotId::from_raw(message.num_data);
                let outcome = self.engine.on_marker(message.from, id).await?;
                if let MarkerOutcome::Completed(report) = &outcome {
                    info!(node = %self.node, snapshot = %id, in_flight = report.in_flight(), "Snapshot reported");
                } else {
                    debug!(node = %self.node, from = %message.from, snapshot = %id, ?outcome, "Marker processed");
                }
            }
            MessageType::Credit => {
                let amount = self.transfer_amount(port, &message)?;
                self.engine.on_credit(message.from, amount);
            }
            MessageType::Debit => {
                let amount = self.transfer_amount(port, &message)?;
                if !self.engine.on_debit(message.from, amount).await? {
                    info!(node = %self.node, from = %message.from, amount, "Debit refused, insufficient funds");
                }
            }
            MessageType::GlobalState => self.on_global_state(port, &message)?,
        }
        Ok(())
    }

    fn on_global_state(&self, port: u16, message: &Message) -> crate::Result<()> {
        let Some(collector) = &self.collector else {
            warn!(node = %self.node, from = %message.from, "GLOBAL_STATE on a node that does not collect, ignored");
            return Ok(());
        };
        self.check_channel(port, message, ChannelKind::Report)?;

        if let Some(state) = collector.accept_message(message)? {
            info!(node = %self.node, "{}", state);
        }
        Ok(())
    }

    /// Validate a CREDIT/DEBIT envelope and return its amount
    fn transfer_amount(&self, port: u16, message: &Message) -> crate::Result<Amount> {
        if message.from.is_external() {
            return Err(crate::Error::Malformed(format!(
                "{} from external sender",
                message.message_type
            )));
        }
        self.check_channel(port, message, ChannelKind::Transfer)?;

        if !self.amounts.contains(message.num_data) {
            return Err(crate::Error::Malformed(format!(
                "amount {} outside {}..={}",
                message.num_data, self.amounts.min, self.amounts.max
            )));
        }
        Ok(message.num_data as Amount)
    }

    /// The port a message arrived on must be the one owned by its sender
    fn check_channel(&self, port: u16, message: &Message, kind: ChannelKind) -> crate::Result<()> {
        match self.layout.classify(port) {
            Some((found, sender)) if found == kind && sender == message.from => Ok(()),
            _ => Err(crate::Error::Malformed(format!(
                "{} from {} arrived on port {}",
                message.message_type, message.from, port
            ))),
        }
    }
}

#[async_trait]
impl MessageHandler for NodeHandler {
    async fn handle(&self, port: u16, message: Message) -> message_bus::Result<()> {
        self.dispatch(port, message)
            .await
            .map_err(|e| message_bus::Error::Handler(e.to_string()))
    }
}
