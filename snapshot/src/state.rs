//! Per-node snapshot bookkeeping
//!
//! A [`LocalSnapshot`] exists from the moment a node learns of a snapshot
//! id until its report is produced. Channels only ever go from open to
//! closed, and a report is produced at most once.

use crate::types::{ChannelEntry, ChannelLog, NodeReport, SnapshotId};
use ledger_core::{Balance, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One snapshot in the logging state
#[derive(Debug, Clone)]
pub struct LocalSnapshot {
    id: SnapshotId,
    balance: Balance,
    open: BTreeSet<NodeId>,
    channels: BTreeMap<NodeId, Vec<ChannelEntry>>,
    reported: bool,
}

impl LocalSnapshot {
    /// Capture `balance` and start recording every channel from `neighbors`
    pub fn new(id: SnapshotId, balance: Balance, neighbors: &[NodeId]) -> Self {
        Self {
            id,
            balance,
            open: neighbors.iter().copied().collect(),
            channels: neighbors.iter().map(|n| (*n, Vec::new())).collect(),
            reported: false,
        }
    }

    /// Snapshot id
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Captured balance
    pub fn balance(&self) -> Balance {
        self.balance
    }

    /// Whether the channel from `from` is still being recorded
    pub fn is_open(&self, from: NodeId) -> bool {
        self.open.contains(&from)
    }

    /// Channels still waiting for their marker
    pub fn open_channels(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.open.iter().copied()
    }

    /// Stop recording the channel from `from`; false if it was not open
    pub fn close(&mut self, from: NodeId) -> bool {
        self.open.remove(&from)
    }

    /// Record a transfer if the channel from `from` is still open
    pub fn record(&mut self, from: NodeId, entry: ChannelEntry) -> bool {
        if !self.open.contains(&from) {
            return false;
        }
        self.channels.entry(from).or_default().push(entry);
        true
    }

    /// Every channel has delivered its marker
    pub fn is_complete(&self) -> bool {
        self.open.is_empty()
    }

    /// Produce the report once the snapshot is complete
    ///
    /// Returns `None` while channels are open or after the report was taken.
    pub fn take_report(&mut self, node: NodeId) -> Option<NodeReport> {
        if self.reported || !self.is_complete() {
            return None;
        }
        self.reported = true;

        Some(NodeReport {
            node,
            snapshot: self.id,
            balance: self.balance,
            channels: self
                .channels
                .iter()
                .map(|(from, entries)| ChannelLog {
                    from: *from,
                    entries: entries.clone(),
                })
                .collect(),
        })
    }
}

/// Snapshot ids that are done, kept as a watermark per initiator
///
/// Sequences below `floor` are all done; `above` holds the done ones past
/// it until the gap closes.
#[derive(Debug, Default)]
pub(crate) struct FinishedIds {
    initiators: HashMap<NodeId, Watermark>,
}

#[derive(Debug, Default)]
struct Watermark {
    floor: u64,
    above: BTreeSet<u64>,
}

impl FinishedIds {
    pub(crate) fn contains(&self, id: SnapshotId) -> bool {
        self.initiators.get(&id.initiator()).is_some_and(|mark| {
            id.sequence() < mark.floor || mark.above.contains(&id.sequence())
        })
    }

    /// Mark `id` done; false if it already was
    pub(crate) fn insert(&mut self, id: SnapshotId) -> bool {
        let mark = self.initiators.entry(id.initiator()).or_default();
        let sequence = id.sequence();
        if sequence < mark.floor || !mark.above.insert(sequence) {
            return false;
        }
        while mark.above.remove(&mark.floor) {
            mark.floor += 1;
        }
        true
    }

    /// Sequences held individually, above some initiator's floor
    #[cfg(test)]
    pub(crate) fn retained(&self) -> usize {
        self.initiators.values().map(|mark| mark.above.len()).sum()
    }
}

/// Live snapshots of one node
#[derive(Debug, Default)]
pub struct SnapshotTable {
    live: HashMap<SnapshotId, LocalSnapshot>,
    finished: FinishedIds,
    next_sequence: u64,
}

impl SnapshotTable {
    /// Create empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for a snapshot started by `initiator`
    pub fn allocate(&mut self, initiator: NodeId) -> SnapshotId {
        let id = SnapshotId::new(initiator, self.next_sequence);
        self.next_sequence += 1;
        id
    }

    /// Whether `id` was already started locally or heard of
    pub fn is_known(&self, id: SnapshotId) -> bool {
        self.live.contains_key(&id) || self.finished.contains(id)
    }

    /// Whether `id` has already reported
    pub fn is_finished(&self, id: SnapshotId) -> bool {
        self.finished.contains(id)
    }

    /// Live snapshot by id
    pub fn get_mut(&mut self, id: SnapshotId) -> Option<&mut LocalSnapshot> {
        self.live.get_mut(&id)
    }

    /// Start tracking a snapshot
    ///
    /// Returns false and drops `snapshot` if the id is already known.
    pub fn insert(&mut self, snapshot: LocalSnapshot) -> bool {
        if self.is_known(snapshot.id()) {
            return false;
        }
        self.live.insert(snapshot.id(), snapshot);
        true
    }

    /// Record a transfer on every live snapshot still recording `from`
    ///
    /// Returns how many snapshots recorded it.
    pub fn record(&mut self, from: NodeId, entry: ChannelEntry) -> usize {
        self.live
            .values_mut()
            .map(|snapshot| snapshot.record(from, entry))
            .filter(|recorded| *recorded)
            .count()
    }

    /// Remove `id` and hand out its report if every channel has closed
    pub fn finish_if_complete(&mut self, id: SnapshotId, node: NodeId) -> Option<NodeReport> {
        let report = self.live.get_mut(&id)?.take_report(node)?;
        self.live.remove(&id);
        self.finished.insert(id);
        Some(report)
    }

    /// Ids currently logging, ascending
    pub fn live_ids(&self) -> Vec<SnapshotId> {
        let mut ids: Vec<_> = self.live.keys().copied().collect();
        ids.sort();
        ids
    }
}
