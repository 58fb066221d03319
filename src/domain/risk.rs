//! Risk state and stake arithmetic.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places for every stake and profit figure.
pub const STAKE_DP: u32 = 2;

/// Round a money amount to cents, half away from zero.
///
/// This is the only rounding rule applied to stakes: `2.345` becomes `2.35`
/// and `-2.345` becomes `-2.35`.
#[must_use]
pub fn round_stake(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(STAKE_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// Martingale parameters for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePlan {
    pub base_stake: Decimal,
    pub multiplier: Decimal,
    /// Loss ceiling; reaching it resets the ladder to the base stake.
    pub max_consecutive_losses: u32,
    pub target_profit: Decimal,
}

impl StakePlan {
    /// Stake after `losses` consecutive losses.
    ///
    /// Computed from scratch as `round2(base × multiplier^losses)` rather than
    /// by repeated rounding, so the ladder never accumulates rounding drift.
    /// Saturates at `Decimal::MAX` instead of overflowing.
    #[must_use]
    pub fn stake_for(&self, losses: u32) -> Decimal {
        let mut stake = self.base_stake;
        for _ in 0..losses {
            stake = stake.checked_mul(self.multiplier).unwrap_or(Decimal::MAX);
        }
        round_stake(stake)
    }
}

/// Why a session stopped accepting trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltReason {
    /// Stopped by the caller.
    Stopped,
    /// Session profit reached the target.
    TargetReached { profit: Decimal },
    /// The ledger rejected a write; in-memory and durable state may differ.
    PersistenceFailure { message: String },
    /// The connection closed for good.
    ConnectionLost { message: String },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::TargetReached { profit } => write!(f, "target reached ({profit})"),
            Self::PersistenceFailure { message } => write!(f, "persistence failure: {message}"),
            Self::ConnectionLost { message } => write!(f, "connection lost: {message}"),
        }
    }
}

/// Snapshot of a session's stake bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub current_stake: Decimal,
    pub consecutive_losses: u32,
    pub session_profit: Decimal,
    pub total_wins: u32,
    pub total_losses: u32,
    pub running: bool,
    pub halt_reason: Option<HaltReason>,
}

impl RiskState {
    /// Fresh, stopped state at the plan's base stake.
    #[must_use]
    pub fn new(plan: &StakePlan) -> Self {
        Self {
            current_stake: round_stake(plan.base_stake),
            consecutive_losses: 0,
            session_profit: Decimal::ZERO,
            total_wins: 0,
            total_losses: 0,
            running: false,
            halt_reason: None,
        }
    }

    #[must_use]
    pub const fn total_runs(&self) -> u32 {
        self.total_wins + self.total_losses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(base: Decimal, multiplier: Decimal) -> StakePlan {
        StakePlan {
            base_stake: base,
            multiplier,
            max_consecutive_losses: 5,
            target_profit: dec!(100),
        }
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_stake(dec!(2.345)), dec!(2.35));
        assert_eq!(round_stake(dec!(2.344)), dec!(2.34));
        assert_eq!(round_stake(dec!(-2.345)), dec!(-2.35));
        assert_eq!(round_stake(dec!(0.125)), dec!(0.13));
    }

    #[test]
    fn ladder_is_computed_without_compounding_rounding() {
        let p = plan(dec!(0.35), dec!(2.5));
        // Repeated rounding would give 0.88 then 2.20.
        assert_eq!(p.stake_for(1), dec!(0.88));
        assert_eq!(p.stake_for(2), dec!(2.19));
    }

    #[test]
    fn ladder_doubles() {
        let p = plan(dec!(1), dec!(2));
        let stakes: Vec<_> = (0..4).map(|n| p.stake_for(n)).collect();
        assert_eq!(stakes, vec![dec!(1), dec!(2), dec!(4), dec!(8)]);
    }

    #[test]
    fn ladder_saturates() {
        let p = plan(dec!(1000000), dec!(1000000));
        assert_eq!(p.stake_for(40), round_stake(Decimal::MAX));
    }
}
