//! Core types for the snapshot engine

use chrono::{DateTime, Utc};
use ledger_core::{Amount, Balance, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bits of a snapshot id holding the initiator index
const INITIATOR_BITS: u32 = 16;
const INITIATOR_MASK: i64 = (1 << INITIATOR_BITS) - 1;

/// Snapshot identifier
///
/// Packs the initiating node and that node's sequence number, so ids from
/// different initiators never collide and each initiator's ids only grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(i64);

impl SnapshotId {
    /// Id for the `sequence`-th snapshot started by `initiator`
    pub fn new(initiator: NodeId, sequence: u64) -> Self {
        let node = initiator.index() as i64 & INITIATOR_MASK;
        Self(((sequence as i64) << INITIATOR_BITS) | node)
    }

    /// Id as carried in `numData`
    pub fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Raw wire value
    pub fn raw(&self) -> i64 {
        self.0
    }

    /// Node that started this snapshot
    pub fn initiator(&self) -> NodeId {
        NodeId::new((self.0 & INITIATOR_MASK) as i32)
    }

    /// Initiator-local sequence number
    pub fn sequence(&self) -> u64 {
        (self.0 >> INITIATOR_BITS) as u64
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.initiator(), self.sequence())
    }
}

/// Transfer message kind recorded on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferKind {
    /// Money arriving at the recording node
    Credit,
    /// Payment request arriving at the recording node
    Debit,
}

/// One transfer caught on a channel while it was being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    /// Message kind at arrival
    pub kind: TransferKind,

    /// Amount carried
    pub amount: Amount,
}

impl ChannelEntry {
    /// Recorded CREDIT
    pub fn credit(amount: Amount) -> Self {
        Self {
            kind: TransferKind::Credit,
            amount,
        }
    }

    /// Recorded DEBIT
    pub fn debit(amount: Amount) -> Self {
        Self {
            kind: TransferKind::Debit,
            amount,
        }
    }

    /// Positive for CREDIT, negative for DEBIT
    pub fn signed(&self) -> Balance {
        match self.kind {
            TransferKind::Credit => self.amount as Balance,
            TransferKind::Debit => -(self.amount as Balance),
        }
    }

    /// Money this entry moved while in flight
    ///
    /// A DEBIT is only a request; the money travels later as a CREDIT.
    pub fn in_flight(&self) -> Balance {
        match self.kind {
            TransferKind::Credit => self.amount as Balance,
            TransferKind::Debit => 0,
        }
    }
}

/// Recorded state of one incoming channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelLog {
    /// Sending end of the channel
    pub from: NodeId,

    /// Transfers recorded, in arrival order
    pub entries: Vec<ChannelEntry>,
}

/// One node's finished share of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    /// Reporting node
    pub node: NodeId,

    /// Snapshot this report belongs to
    pub snapshot: SnapshotId,

    /// Balance captured when the node joined the snapshot
    pub balance: Balance,

    /// Every incoming channel, ordered by sender
    pub channels: Vec<ChannelLog>,
}

impl NodeReport {
    /// Money in flight towards this node
    pub fn in_flight(&self) -> Balance {
        self.entries().map(ChannelEntry::in_flight).sum()
    }

    /// Signed sum of everything recorded
    pub fn net_recorded(&self) -> Balance {
        self.entries().map(ChannelEntry::signed).sum()
    }

    /// Entries recorded on the channel from `from`
    pub fn channel(&self, from: NodeId) -> Option<&[ChannelEntry]> {
        self.channels
            .iter()
            .find(|log| log.from == from)
            .map(|log| log.entries.as_slice())
    }

    /// Encode for a GLOBAL_STATE `strData`
    pub fn to_payload(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a GLOBAL_STATE `strData`
    pub fn from_payload(payload: &str) -> crate::Result<Self> {
        serde_json::from_str(payload).map_err(|e| crate::Error::MalformedReport(e.to_string()))
    }

    fn entries(&self) -> impl Iterator<Item = &ChannelEntry> {
        self.channels.iter().flat_map(|log| log.entries.iter())
    }
}

impl fmt::Display for NodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "snapshot {} / state of node {}", self.snapshot, self.node)?;
        writeln!(f, "  balance: {}", self.balance)?;
        for log in &self.channels {
            write!(f, "  channel {} => {}:", log.from, self.node)?;
            if log.entries.is_empty() {
                write!(f, " empty")?;
            }
            for entry in &log.entries {
                write!(f, " {:+}", entry.signed())?;
            }
            writeln!(f)?;
        }
        write!(f, "  in flight: {}", self.in_flight())
    }
}

/// Aggregated result of one snapshot across every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Snapshot id
    pub snapshot: SnapshotId,

    /// Per-node reports, ordered by node
    pub reports: Vec<NodeReport>,

    /// Sum of captured balances
    pub total_balance: Balance,

    /// Sum of money in flight on all channels
    pub in_flight: Balance,

    /// Total money in the system
    pub total: Balance,

    /// When the last report arrived
    pub completed_at: DateTime<Utc>,
}

impl GlobalState {
    /// Combine one report per node
    pub fn from_reports(snapshot: SnapshotId, mut reports: Vec<NodeReport>) -> Self {
        reports.sort_by_key(|report| report.node);

        let total_balance = reports.iter().map(|r| r.balance).sum();
        let in_flight = reports.iter().map(NodeReport::in_flight).sum();

        Self {
            snapshot,
            reports,
            total_balance,
            in_flight,
            total: total_balance + in_flight,
            completed_at: Utc::now(),
        }
    }
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "global state {}: {} nodes, balances {}, in flight {}, total {}",
            self.snapshot,
            self.reports.len(),
            self.total_balance,
            self.in_flight,
            self.total
        )
    }
}
