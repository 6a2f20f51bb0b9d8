//! Snapshot engine
//!
//! Drives the per-node state machine of every snapshot id:
//!
//! ```text
//!   absent ──(initiate | first MARKER)──► logging ──(last MARKER)──► finished
//! ```
//!
//! Every step that mutates the ledger, captures a balance or enqueues a
//! MARKER runs under the table lock. Channels are opened before the lock is
//! taken and written with the synchronous [`OutboundChannel::enqueue`], so a
//! capture can never fall between a transfer's ledger update and its entry
//! in a channel log. Lock order is table, then ledger.

use crate::{
    collector::Collector,
    state::{LocalSnapshot, SnapshotTable},
    types::{ChannelEntry, NodeReport, SnapshotId},
    Result,
};
use futures::future::join_all;
use ledger_core::{Amount, Ledger, NodeId};
use message_bus::{Connector, Message, OutboundChannel, Route};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a MARKER did to the local state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// Operator trigger started a new snapshot
    Initiated(SnapshotId),

    /// First MARKER for this id; logging started and markers propagated
    Started(SnapshotId),

    /// Channel closed, others still open
    Closed {
        /// Snapshot id
        snapshot: SnapshotId,
        /// Channels still waiting for their marker
        remaining: usize,
    },

    /// Last channel closed; the report has been delivered
    Completed(NodeReport),

    /// Late, duplicate or foreign marker; nothing changed
    Ignored,
}

/// Snapshot engine of one node
pub struct SnapshotEngine {
    /// Local node
    node: NodeId,

    /// Neighbors, both the channels we record and the ones we mark
    neighbors: Vec<NodeId>,

    /// Node aggregating reports
    collector: NodeId,

    /// Local ledger
    ledger: Arc<Ledger>,

    /// Outbound side
    connector: Arc<dyn Connector>,

    /// Set when this node is the collector
    local_collector: Option<Arc<Collector>>,

    /// Live and finished snapshots
    table: Mutex<SnapshotTable>,
}

impl SnapshotEngine {
    /// Create new engine
    pub fn new(
        node: NodeId,
        neighbors: Vec<NodeId>,
        collector: NodeId,
        ledger: Arc<Ledger>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            node,
            neighbors,
            collector,
            ledger,
            connector,
            local_collector: None,
            table: Mutex::new(SnapshotTable::new()),
        }
    }

    /// Hand reports straight to a local collector instead of the network
    pub fn with_collector(mut self, collector: Arc<Collector>) -> Self {
        self.local_collector = Some(collector);
        self
    }

    /// Local node
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Configured neighbors
    pub fn neighbors(&self) -> &[NodeId] {
        &self.neighbors
    }

    /// Local ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Start a new snapshot from this node
    pub async fn initiate(&self) -> Result<SnapshotId> {
        let channels = self.neighbor_channels().await;

        let (id, balance, report) = {
            let mut table = self.table.lock();
            let id = table.allocate(self.node);
            let balance = self.ledger.balance();

            table.insert(LocalSnapshot::new(id, balance, &self.neighbors));
            self.propagate(&channels, id);

            (id, balance, table.finish_if_complete(id, self.node))
        };

        info!(node = %self.node, snapshot = %id, balance, "Snapshot initiated");

        if let Some(report) = report {
            self.deliver(&report).await?;
        }
        Ok(id)
    }

    /// Process a MARKER for `id` arriving on the channel from `from`
    pub async fn on_marker(&self, from: NodeId, id: SnapshotId) -> Result<MarkerOutcome> {
        if from.is_external() {
            return self.initiate().await.map(MarkerOutcome::Initiated);
        }

        if !self.neighbors.contains(&from) {
            warn!(node = %self.node, %from, snapshot = %id, "Marker from non-neighbor ignored");
            return Ok(MarkerOutcome::Ignored);
        }

        let known = {
            let mut table = self.table.lock();
            self.advance_known(&mut table, from, id)
        };
        if let Some(outcome) = known {
            return self.conclude(outcome).await;
        }

        // Unseen id: open channels first, then re-check under the lock so
        // only one of several racing first markers creates the entry.
        let channels = self.neighbor_channels().await;

        let outcome = {
            let mut table = self.table.lock();
            match self.advance_known(&mut table, from, id) {
                Some(outcome) => outcome,
                None => {
                    let balance = self.ledger.balance();
                    let mut snapshot = LocalSnapshot::new(id, balance, &self.neighbors);
                    snapshot.close(from);
                    table.insert(snapshot);
                    self.propagate(&channels, id);

                    info!(node = %self.node, %from, snapshot = %id, balance, "Snapshot joined");

                    match table.finish_if_complete(id, self.node) {
                        Some(report) => MarkerOutcome::Completed(report),
                        None => MarkerOutcome::Started(id),
                    }
                }
            }
        };

        self.conclude(outcome).await
    }

    /// Apply an incoming CREDIT; returns how many snapshots recorded it
    pub fn on_credit(&self, from: NodeId, amount: Amount) -> usize {
        let mut table = self.table.lock();
        self.ledger.credit(amount);
        let recorded = table.record(from, ChannelEntry::credit(amount));

        debug!(node = %self.node, %from, amount, recorded, "Credit applied");
        recorded
    }

    /// Apply an incoming DEBIT request from `from`
    ///
    /// On success the money goes back to `from` as a CREDIT queued inside the
    /// same critical section. Returns `Ok(false)` on insufficient funds.
    pub async fn on_debit(&self, from: NodeId, amount: Amount) -> Result<bool> {
        let channel = self.connector.connect_to(Route::transfer(from)).await;

        let mut table = self.table.lock();
        let recorded = table.record(from, ChannelEntry::debit(amount));
        let channel = channel?;

        if !self.ledger.debit(amount) {
            debug!(node = %self.node, %from, amount, recorded, "Insufficient funds for debit");
            return Ok(false);
        }

        if let Err(e) = channel.enqueue(Message::credit(self.node, amount)) {
            // nothing left the node, undo
            self.ledger.credit(amount);
            return Err(e.into());
        }

        debug!(node = %self.node, %from, amount, recorded, "Debit applied, credit sent back");
        Ok(true)
    }

    /// Run `f` against the ledger while no snapshot can be captured
    ///
    /// Used by the transaction generator to debit locally and enqueue the
    /// matching CREDIT as one step.
    pub fn atomically<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Ledger) -> T,
    {
        let _table = self.table.lock();
        f(&self.ledger)
    }

    /// Ids currently logging, ascending
    pub fn live_snapshots(&self) -> Vec<SnapshotId> {
        self.table.lock().live_ids()
    }

    /// Whether this node already reported `id`
    pub fn is_finished(&self, id: SnapshotId) -> bool {
        self.table.lock().is_finished(id)
    }

    /// Close the channel from `from` on a snapshot this node already knows
    ///
    /// `None` means the id is new and a snapshot has to be started.
    fn advance_known(
        &self,
        table: &mut SnapshotTable,
        from: NodeId,
        id: SnapshotId,
    ) -> Option<MarkerOutcome> {
        if table.is_finished(id) {
            debug!(node = %self.node, %from, snapshot = %id, "Marker for finished snapshot ignored");
            return Some(MarkerOutcome::Ignored);
        }

        let Some(snapshot) = table.get_mut(id) else {
            if id.initiator() == self.node {
                warn!(node = %self.node, %from, snapshot = %id, "Marker for unknown local snapshot ignored");
                return Some(MarkerOutcome::Ignored);
            }
            return None;
        };

        if !snapshot.close(from) {
            warn!(node = %self.node, %from, snapshot = %id, "Duplicate marker ignored");
            return Some(MarkerOutcome::Ignored);
        }
        let remaining = snapshot.open_channels().count();

        Some(match table.finish_if_complete(id, self.node) {
            Some(report) => MarkerOutcome::Completed(report),
            None => MarkerOutcome::Closed {
                snapshot: id,
                remaining,
            },
        })
    }

    async fn conclude(&self, outcome: MarkerOutcome) -> Result<MarkerOutcome> {
        if let MarkerOutcome::Completed(report) = &outcome {
            self.deliver(report).await?;
        }
        Ok(outcome)
    }

    /// Transfer channels to every neighbor that can be reached
    ///
    /// Connects run concurrently, so a slow neighbor costs one timeout.
    async fn neighbor_channels(&self) -> Vec<OutboundChannel> {
        let connects = self
            .neighbors
            .iter()
            .map(|neighbor| self.connector.connect_to(Route::transfer(*neighbor)));
        let results = join_all(connects).await;

        let mut channels = Vec::with_capacity(self.neighbors.len());
        for (neighbor, result) in self.neighbors.iter().zip(results) {
            match result {
                Ok(channel) => channels.push(channel),
                Err(e) => {
                    warn!(node = %self.node, %neighbor, "Cannot reach neighbor for markers: {}", e);
                }
            }
        }
        channels
    }

    /// Queue a MARKER on every channel; each send stands on its own
    fn propagate(&self, channels: &[OutboundChannel], id: SnapshotId) {
        for channel in channels {
            if let Err(e) = channel.enqueue(Message::marker(self.node, id.raw())) {
                warn!(node = %self.node, snapshot = %id, route = %channel.route(), "Marker not sent: {}", e);
            }
        }
    }

    /// Send a finished report to the collector
    async fn deliver(&self, report: &NodeReport) -> Result<()> {
        info!(
            node = %self.node,
            snapshot = %report.snapshot,
            balance = report.balance,
            in_flight = report.in_flight(),
            "Local snapshot finished"
        );
        debug!("{}", report);

        if let Some(collector) = &self.local_collector {
            collector.accept(report.clone());
            return Ok(());
        }

        let message = Message::global_state(self.node, report.snapshot.raw(), report.to_payload()?);
        self.connector
            .send(Route::report(self.collector), message)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotEngine")
            .field("node", &self.node)
            .field("neighbors", &self.neighbors)
            .field("collector", &self.collector)
            .field("live", &self.table.try_lock().map(|table| table.live_ids()))
            .finish()
    }
}
