//! Aggregation of node reports into global states
//!
//! Runs on the collector node. Reports for one snapshot id accumulate until
//! every node has reported; the resulting [`GlobalState`] is kept and
//! published to subscribers.

use crate::{
    state::FinishedIds,
    types::{GlobalState, NodeReport, SnapshotId},
    Error, Result,
};
use ledger_core::NodeId;
use message_bus::{Message, MessageType};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the global state broadcast
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<SnapshotId, BTreeMap<NodeId, NodeReport>>,
    done: FinishedIds,
    completed: Vec<GlobalState>,
}

/// Report collector
#[derive(Debug)]
pub struct Collector {
    node_count: usize,
    inner: Mutex<Inner>,
    events: broadcast::Sender<GlobalState>,
}

impl Collector {
    /// Collector expecting one report from each of `node_count` nodes
    pub fn new(node_count: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            node_count,
            inner: Mutex::new(Inner::default()),
            events,
        }
    }

    /// Add one node's report
    ///
    /// Returns the global state when this report was the last one missing.
    /// Duplicates and reports for already aggregated snapshots are ignored.
    pub fn accept(&self, report: NodeReport) -> Option<GlobalState> {
        let node = report.node;
        let snapshot = report.snapshot;

        if !self.is_member(node) {
            warn!(%node, %snapshot, "Report from unknown node ignored");
            return None;
        }
        if !self.is_member(snapshot.initiator()) {
            warn!(%node, %snapshot, "Report for unknown snapshot id ignored");
            return None;
        }

        info!(%node, %snapshot, balance = report.balance, in_flight = report.in_flight(), "Report received");
        debug!("{}", report);

        let state = {
            let mut inner = self.inner.lock();

            if inner.done.contains(snapshot) {
                debug!(%node, %snapshot, "Report for aggregated snapshot ignored");
                return None;
            }

            let reports = inner.pending.entry(snapshot).or_default();
            if reports.contains_key(&node) {
                warn!(%node, %snapshot, "Duplicate report ignored");
                return None;
            }
            reports.insert(node, report);

            if reports.len() < self.node_count {
                return None;
            }

            let reports = inner.pending.remove(&snapshot).unwrap_or_default();
            let state = GlobalState::from_reports(snapshot, reports.into_values().collect());
            inner.done.insert(snapshot);
            inner.completed.push(state.clone());
            state
        };

        info!(
            snapshot = %state.snapshot,
            balances = state.total_balance,
            in_flight = state.in_flight,
            total = state.total,
            "Global state complete"
        );

        // no subscribers is fine
        let _ = self.events.send(state.clone());
        Some(state)
    }

    fn is_member(&self, node: NodeId) -> bool {
        !node.is_external() && (node.index() as usize) < self.node_count
    }

    /// Decode a GLOBAL_STATE message and add its report
    pub fn accept_message(&self, message: &Message) -> Result<Option<GlobalState>> {
        if message.message_type != MessageType::GlobalState {
            return Err(Error::MalformedReport(format!(
                "expected GLOBAL_STATE, got {}",
                message.message_type
            )));
        }

        let payload = message
            .str_data
            .as_deref()
            .ok_or_else(|| Error::MalformedReport("missing strData".to_string()))?;
        let report = NodeReport::from_payload(payload)?;

        if report.node != message.from || report.snapshot.raw() != message.num_data {
            return Err(Error::MalformedReport(format!(
                "report for node {} snapshot {} arrived as from {} id {}",
                report.node, report.snapshot, message.from, message.num_data
            )));
        }

        Ok(self.accept(report))
    }

    /// Global states aggregated so far, in completion order
    pub fn completed(&self) -> Vec<GlobalState> {
        self.inner.lock().completed.clone()
    }

    /// Snapshot ids still waiting for reports
    pub fn pending(&self) -> Vec<SnapshotId> {
        let mut ids: Vec<_> = self.inner.lock().pending.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Receive every global state completed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<GlobalState> {
        self.events.subscribe()
    }
}
