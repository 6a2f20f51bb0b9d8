//! Configuration for the node account

use crate::types::{AmountRange, Balance};
use serde::{Deserialize, Serialize};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Balance every node starts with
    pub initial_balance: Balance,

    /// Amounts accepted on incoming CREDIT/DEBIT messages
    pub amounts: AmountRange,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 5_000_000,
            amounts: AmountRange::default(),
        }
    }
}

impl LedgerConfig {
    /// Reject settings the node cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.initial_balance < 0 {
            return Err(crate::Error::Config(format!(
                "initial balance must not be negative, got {}",
                self.initial_balance
            )));
        }
        self.amounts.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.initial_balance, 5_000_000);
        assert_eq!(config.amounts.min, 10_000);
        assert_eq!(config.amounts.max, 50_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: LedgerConfig = toml::from_str("initial_balance = 1000").unwrap();
        assert_eq!(config.initial_balance, 1000);
        assert_eq!(config.amounts, AmountRange::default());
    }

    #[test]
    fn test_negative_balance_rejected() {
        let config = LedgerConfig {
            initial_balance: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
