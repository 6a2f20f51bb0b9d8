//! Bank Ledger Core
//!
//! The account balance every bank node owns, plus the identifiers and
//! amount types shared by the transport and snapshot layers.
//!
//! # Invariants
//!
//! - Non-negative balance: no accepted debit drives the balance below zero
//! - Indivisible debit: check-and-subtract happens in one critical section
//! - Money conservation: balance == initial + Σ(credits) − Σ(accepted debits)

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod types;

// Re-exports
pub use config::LedgerConfig;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use types::{Amount, AmountRange, Balance, NodeId};
