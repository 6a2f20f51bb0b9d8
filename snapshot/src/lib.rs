//! Distributed Snapshots
//!
//! Chandy-Lamport global snapshots over the bank network: each node captures
//! its balance, records money in flight on its incoming channels until a
//! MARKER closes them, and reports to the collector node.
//!
//! # Architecture
//!
//! ```text
//! listener ─► SnapshotEngine ─► (table lock) ─► Ledger
//!                  │                 │
//!                  │                 └─► OutboundChannel (MARKER, CREDIT)
//!                  └─► NodeReport ─► collector ─► GlobalState
//! ```
//!
//! Several snapshot ids may be logging at once; each keeps its own open
//! channel set and logs. An id reports exactly once and is never revived.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Ledger, NodeId};
//! use message_bus::Transport;
//! use snapshot::SnapshotEngine;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # async fn run() -> snapshot::Result<()> {
//! let transport = Arc::new(Transport::new(NodeId::new(1), HashMap::new()));
//! let engine = SnapshotEngine::new(
//!     NodeId::new(1),
//!     vec![NodeId::new(0), NodeId::new(2)],
//!     NodeId::new(0),
//!     Arc::new(Ledger::new(5_000_000)),
//!     transport,
//! );
//!
//! let id = engine.initiate().await?;
//! println!("started snapshot {}", id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod collector;
pub mod engine;
pub mod error;
pub mod state;
pub mod types;

// Re-exports
pub use collector::Collector;
pub use engine::{MarkerOutcome, SnapshotEngine};
pub use error::{Error, Result};
pub use state::{LocalSnapshot, SnapshotTable};
pub use types::{ChannelEntry, ChannelLog, GlobalState, NodeReport, SnapshotId, TransferKind};
