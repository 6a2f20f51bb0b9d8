//! Core types shared by every bank node component
//!
//! Money is kept in integer minor units; no floating point anywhere.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transfer amount (always positive once validated)
pub type Amount = u64;

/// Account balance
pub type Balance = i64;

/// Node index in the topology
///
/// Defaults to node 0, the conventional collector.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(i32);

impl NodeId {
    /// Sender used by operator-triggered messages that have no real origin
    pub const EXTERNAL: NodeId = NodeId(-1);

    /// Create node ID from its topology index
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Raw index
    pub const fn index(&self) -> i32 {
        self.0
    }

    /// True for the negative sentinel (any negative index)
    pub const fn is_external(&self) -> bool {
        self.0 < 0
    }
}

impl From<i32> for NodeId {
    fn from(index: i32) -> Self {
        Self(index)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_external() {
            write!(f, "external")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Range of amounts a single transfer may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    /// Smallest accepted amount
    pub min: Amount,

    /// Largest accepted amount
    pub max: Amount,
}

impl AmountRange {
    /// Create a range, rejecting empty ones
    pub fn new(min: Amount, max: Amount) -> crate::Result<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    /// Check the range can be sampled
    pub fn validate(&self) -> crate::Result<()> {
        if self.min == 0 || self.min >= self.max {
            return Err(crate::Error::InvalidAmount(format!(
                "empty amount range [{}, {})",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Receive-side check, inclusive on both ends
    pub fn contains(&self, amount: i64) -> bool {
        amount >= self.min as i64 && amount <= self.max as i64
    }

    /// Draw uniformly from `[min, max)`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Amount {
        rng.gen_range(self.min..self.max)
    }
}

impl Default for AmountRange {
    fn default() -> Self {
        Self {
            min: 10_000,
            max: 50_000,
        }
    }
}
