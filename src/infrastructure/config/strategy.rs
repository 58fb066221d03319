//! Strategy and staking configuration.
//!
//! This is the parameter set the excluded UI layer would normally supply:
//! what to trade, and how the martingale ladder behaves.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::{ContractType, DomainError, DurationUnit, StakePlan, TradeRequest};

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Session name; aggregates are keyed by it.
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_contract_type")]
    pub contract_type: ContractType,
    /// Barrier digit for over/under/match/differ contracts.
    #[serde(default = "default_barrier")]
    pub barrier: Option<u8>,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    #[serde(default = "default_base_stake")]
    pub base_stake: Decimal,
    #[serde(default = "default_martingale_multiplier")]
    pub martingale_multiplier: Decimal,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_target_profit")]
    pub target_profit: Decimal,
    /// Restart this long after a target halt. Unset means stay halted.
    #[serde(default)]
    pub auto_restart_cooldown_secs: Option<u64>,
    /// Pause before retrying a failed submission (milliseconds).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_session() -> String {
    "default".into()
}

fn default_symbol() -> String {
    "R_100".into()
}

const fn default_contract_type() -> ContractType {
    ContractType::DigitOver
}

#[allow(clippy::unnecessary_wraps)]
const fn default_barrier() -> Option<u8> {
    Some(5)
}

const fn default_duration() -> u32 {
    1
}

fn default_base_stake() -> Decimal {
    Decimal::new(35, 2) // 0.35
}

fn default_martingale_multiplier() -> Decimal {
    Decimal::TWO
}

const fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_target_profit() -> Decimal {
    Decimal::TEN
}

const fn default_retry_delay_ms() -> u64 {
    2_000
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            session: default_session(),
            symbol: default_symbol(),
            contract_type: default_contract_type(),
            barrier: default_barrier(),
            duration: default_duration(),
            duration_unit: DurationUnit::default(),
            base_stake: default_base_stake(),
            martingale_multiplier: default_martingale_multiplier(),
            max_consecutive_losses: default_max_consecutive_losses(),
            target_profit: default_target_profit(),
            auto_restart_cooldown_secs: None,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl StrategyConfig {
    #[must_use]
    pub fn stake_plan(&self) -> StakePlan {
        StakePlan {
            base_stake: self.base_stake,
            multiplier: self.martingale_multiplier,
            max_consecutive_losses: self.max_consecutive_losses,
            target_profit: self.target_profit,
        }
    }

    /// The configured contract at `stake`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stake is not positive or a required barrier
    /// is missing.
    pub fn request(&self, stake: Decimal) -> Result<TradeRequest, DomainError> {
        let request = TradeRequest::try_new(
            self.symbol.as_str(),
            self.contract_type,
            self.barrier,
            stake,
            self.duration,
        )?;
        Ok(TradeRequest {
            duration_unit: self.duration_unit,
            ..request
        })
    }

    #[must_use]
    pub fn auto_restart_cooldown(&self) -> Option<Duration> {
        self.auto_restart_cooldown_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
