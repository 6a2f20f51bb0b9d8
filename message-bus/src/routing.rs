//! Channel addressing between bank nodes
//!
//! Every ordered pair of nodes gets its own logical channel, told apart on
//! the receiving side by the listening port:
//!
//! - transfer channel `i -> j` is bound at `base_port(j) + i` on node `j`
//! - report channel `i -> collector` is bound at
//!   `base_port(collector) + report_offset + i`

use ledger_core::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a channel carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    /// CREDIT, DEBIT and MARKER traffic
    Transfer,
    /// GLOBAL_STATE reports to the collector
    Report,
}

/// Connection-cache key: where a message goes and on which channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    /// Receiving node
    pub target: NodeId,
    /// Channel kind
    pub kind: ChannelKind,
}

impl Route {
    /// Transfer channel to `target`
    pub fn transfer(target: NodeId) -> Self {
        Self {
            target,
            kind: ChannelKind::Transfer,
        }
    }

    /// Report channel to the collector
    pub fn report(collector: NodeId) -> Self {
        Self {
            target: collector,
            kind: ChannelKind::Report,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChannelKind::Transfer => write!(f, "transfer->{}", self.target),
            ChannelKind::Report => write!(f, "report->{}", self.target),
        }
    }
}

/// Port layout of one receiving node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLayout {
    /// First transfer port (sender 0)
    pub base_port: u16,

    /// Distance from `base_port` to the first report port
    pub report_offset: u16,
}

impl PortLayout {
    /// Create layout
    pub fn new(base_port: u16, report_offset: u16) -> Self {
        Self {
            base_port,
            report_offset,
        }
    }

    /// Port on which this node receives transfers from `sender`
    pub fn transfer_port(&self, sender: NodeId) -> Option<u16> {
        self.offset_port(0, sender)
    }

    /// Port on which this node (as collector) receives reports from `sender`
    pub fn report_port(&self, sender: NodeId) -> Option<u16> {
        self.offset_port(self.report_offset, sender)
    }

    /// Port a `kind` channel from `sender` lands on
    pub fn port_for(&self, kind: ChannelKind, sender: NodeId) -> Option<u16> {
        match kind {
            ChannelKind::Transfer => self.transfer_port(sender),
            ChannelKind::Report => self.report_port(sender),
        }
    }

    /// Which channel a listening port belongs to
    ///
    /// Returns `None` for ports outside the convention (operator control
    /// ports, for instance).
    pub fn classify(&self, port: u16) -> Option<(ChannelKind, NodeId)> {
        let delta = port.checked_sub(self.base_port)?;
        if delta >= self.report_offset {
            let sender = delta - self.report_offset;
            // anything past a second stride is not ours
            if sender >= self.report_offset {
                return None;
            }
            Some((ChannelKind::Report, NodeId::new(sender as i32)))
        } else {
            Some((ChannelKind::Transfer, NodeId::new(delta as i32)))
        }
    }

    fn offset_port(&self, offset: u16, sender: NodeId) -> Option<u16> {
        if sender.is_external() {
            return None;
        }
        let sender = u16::try_from(sender.index()).ok()?;
        self.base_port.checked_add(offset)?.checked_add(sender)
    }
}

impl Default for PortLayout {
    fn default() -> Self {
        Self {
            base_port: 5000,
            report_offset: 100,
        }
    }
}
