//! Node account ledger
//!
//! A single balance shared by every listener task and the transaction
//! generator of one node. It is constructed once by the node runtime and
//! handed out as `Arc<Ledger>`; there is no global instance.
//!
//! # Example
//!
//! ```
//! use ledger_core::Ledger;
//!
//! let ledger = Ledger::new(5_000_000);
//! assert!(!ledger.debit(6_000_000));
//! assert_eq!(ledger.balance(), 5_000_000);
//!
//! ledger.credit(20_000);
//! assert!(ledger.debit(5_020_000));
//! assert_eq!(ledger.balance(), 0);
//! ```

use crate::types::{Amount, Balance};
use parking_lot::Mutex;

/// Account balance of one bank node
#[derive(Debug)]
pub struct Ledger {
    /// Current balance, guarded so debit can check-and-subtract atomically
    balance: Mutex<Balance>,
}

impl Ledger {
    /// Open an account with the given starting balance
    pub fn new(initial_balance: Balance) -> Self {
        Self {
            balance: Mutex::new(initial_balance),
        }
    }

    /// Add money to the account
    pub fn credit(&self, amount: Amount) {
        let mut balance = self.balance.lock();
        *balance += amount as Balance;

        tracing::trace!(amount, balance = *balance, "credit applied");
    }

    /// Take money from the account if it is covered
    ///
    /// Returns `false` and leaves the balance untouched when the debit would
    /// overdraw the account. Insufficient funds is an ordinary outcome, not
    /// an error.
    pub fn debit(&self, amount: Amount) -> bool {
        let mut balance = self.balance.lock();
        let remaining = *balance - amount as Balance;
        if remaining < 0 {
            tracing::trace!(amount, balance = *balance, "debit refused, insufficient funds");
            return false;
        }

        *balance = remaining;
        tracing::trace!(amount, balance = *balance, "debit applied");
        true
    }

    /// Current balance
    pub fn balance(&self) -> Balance {
        *self.balance.lock()
    }
}
