//! Bank Node
//!
//! One process of the simulated bank network: an account, a listener per
//! incoming channel, a random transaction generator and the snapshot engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        BankNode                          │
//! │                                                          │
//! │  Listener(port) ─┐                                       │
//! │  Listener(port) ─┼─► NodeHandler ─► SnapshotEngine ─┐    │
//! │  Listener(port) ─┘                      │           │    │
//! │                                         ▼           ▼    │
//! │  TransactionGenerator ──────────────► Ledger    Transport│
//! │                                                          │
//! │  Collector (node 0 only) ◄── GLOBAL_STATE reports        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. Load [`NodeConfig`] and [`Topology`]
//! 2. [`BankNode::start`] binds every configured port; a bind failure is fatal
//! 3. The node runs until shutdown is signalled
//! 4. [`BankNode::shutdown`] stops listeners and generator, then closes
//!    every outbound connection

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod generator;
pub mod handler;
pub mod node;

// Re-exports
pub use config::{GeneratorConfig, NodeConfig, NodeEntry, Topology};
pub use error::{Error, Result};
pub use generator::{Round, TransactionGenerator};
pub use handler::NodeHandler;
pub use node::BankNode;
