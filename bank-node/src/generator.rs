//! Random transfer traffic
//!
//! Each round picks a neighbor, an amount and a direction:
//!
//! - CREDIT: debit the local account and send the money to the neighbor,
//!   skipped when the account cannot cover it
//! - DEBIT: ask the neighbor to send money back

use crate::config::GeneratorConfig;
use ledger_core::{Amount, AmountRange, NodeId};
use message_bus::{Connector, Message, MessageType, Route};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use snapshot::SnapshotEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of one generator round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Round {
    /// Message queued to `to`
    Sent {
        /// Receiving neighbor
        to: NodeId,
        /// CREDIT or DEBIT
        message_type: MessageType,
        /// Amount carried
        amount: Amount,
    },

    /// Not enough money for a CREDIT; nothing changed
    Skipped {
        /// Neighbor that would have received it
        to: NodeId,
        /// Amount that did not fit
        amount: Amount,
    },

    /// Neighbor unreachable; nothing changed
    Failed {
        /// Neighbor that could not be reached
        to: NodeId,
    },

    /// Node has no neighbors
    Idle,
}

/// Transaction generator of one node
pub struct TransactionGenerator {
    node: NodeId,
    neighbors: Vec<NodeId>,
    amounts: AmountRange,
    config: GeneratorConfig,
    engine: Arc<SnapshotEngine>,
    connector: Arc<dyn Connector>,
    rng: StdRng,
}

impl TransactionGenerator {
    /// Create new generator
    pub fn new(
        engine: Arc<SnapshotEngine>,
        connector: Arc<dyn Connector>,
        amounts: AmountRange,
        config: GeneratorConfig,
    ) -> Self {
        Self {
            node: engine.node(),
            neighbors: engine.neighbors().to_vec(),
            amounts,
            config,
            engine,
            connector,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Pause before the next round
    pub fn next_pause(&mut self) -> Duration {
        let jitter = if self.config.sleep_span_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..self.config.sleep_span_ms)
        };
        Duration::from_millis(self.config.min_sleep_ms + jitter)
    }

    /// Run one round without sleeping
    pub async fn round(&mut self) -> Round {
        if self.neighbors.is_empty() {
            return Round::Idle;
        }

        let to = self.neighbors[self.rng.gen_range(0..self.neighbors.len())];
        let amount = self.amounts.sample(&mut self.rng);
        let message_type = if self.rng.gen_bool(0.5) {
            MessageType::Credit
        } else {
            MessageType::Debit
        };

        let channel = match self.connector.connect_to(Route::transfer(to)).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(node = %self.node, %to, "Neighbor unreachable, skipping round: {}", e);
                return Round::Failed { to };
            }
        };

        let sent = match message_type {
            MessageType::Credit => self.engine.atomically(|ledger| {
                if !ledger.debit(amount) {
                    return Ok(false);
                }
                channel
                    .enqueue(Message::credit(self.node, amount))
                    .map(|()| true)
                    .map_err(|e| {
                        ledger.credit(amount);
                        e
                    })
            }),
            _ => channel
                .enqueue(Message::debit(self.node, amount))
                .map(|()| true),
        };

        match sent {
            Ok(true) => {
                debug!(node = %self.node, %to, %message_type, amount, "Transfer sent");
                Round::Sent {
                    to,
                    message_type,
                    amount,
                }
            }
            Ok(false) => {
                debug!(node = %self.node, %to, amount, "Insufficient funds, skipping round");
                Round::Skipped { to, amount }
            }
            Err(e) => {
                warn!(node = %self.node, %to, "Send failed, skipping round: {}", e);
                Round::Failed { to }
            }
        }
    }

    /// Generate traffic until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(node = %self.node, neighbors = ?self.neighbors, "Transaction generator running");

        while !*shutdown.borrow() {
            let pause = self.next_pause();
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if *shutdown.borrow() {
                break;
            }
            self.round().await;
        }

        info!(node = %self.node, "Transaction generator stopped");
    }
}

impl std::fmt::Debug for TransactionGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionGenerator")
            .field("node", &self.node)
            .field("neighbors", &self.neighbors)
            .field("config", &self.config)
            .finish()
    }
}
