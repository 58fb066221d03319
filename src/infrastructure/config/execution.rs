//! Execution backend selection and trade timeouts.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Where contracts are bought.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Real contracts through the venue connection.
    Live,
    /// Paper trading settled from the live tick stream.
    #[default]
    Simulated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_propose_timeout_ms")]
    pub propose_timeout_ms: u64,
    #[serde(default = "default_buy_timeout_ms")]
    pub buy_timeout_ms: u64,
    /// Emit an overdue warning when a contract stays open this long.
    #[serde(default = "default_settlement_warning_secs")]
    pub settlement_warning_secs: u64,
    /// Simulated payout as a multiple of stake (e.g. 1.95).
    #[serde(default = "default_payout_ratio")]
    pub payout_ratio: Decimal,
}

const fn default_propose_timeout_ms() -> u64 {
    10_000
}

const fn default_buy_timeout_ms() -> u64 {
    10_000
}

const fn default_settlement_warning_secs() -> u64 {
    60
}

fn default_payout_ratio() -> Decimal {
    Decimal::new(195, 2)
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            propose_timeout_ms: default_propose_timeout_ms(),
            buy_timeout_ms: default_buy_timeout_ms(),
            settlement_warning_secs: default_settlement_warning_secs(),
            payout_ratio: default_payout_ratio(),
        }
    }
}

impl ExecutionConfig {
    #[must_use]
    pub const fn propose_timeout(&self) -> Duration {
        Duration::from_millis(self.propose_timeout_ms)
    }

    #[must_use]
    pub const fn buy_timeout(&self) -> Duration {
        Duration::from_millis(self.buy_timeout_ms)
    }

    #[must_use]
    pub const fn settlement_warning(&self) -> Duration {
        Duration::from_secs(self.settlement_warning_secs)
    }
}
