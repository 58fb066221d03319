//! Durable per-session rollups.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trade::{ExecutedTrade, TradeResult};

/// Aggregate counters for a session name, upserted after each settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAggregate {
    pub session: String,
    /// Sum of stakes of settled contracts.
    pub total_stake: Decimal,
    /// Settled contracts.
    pub runs: u32,
    pub wins: u32,
    pub losses: u32,
    pub profit: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl SessionAggregate {
    #[must_use]
    pub fn empty(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            total_stake: Decimal::ZERO,
            runs: 0,
            wins: 0,
            losses: 0,
            profit: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// Fold one terminal trade into the rollup.
    ///
    /// Pending and failed trades carry no settled stake and are ignored.
    pub fn record(&mut self, trade: &ExecutedTrade) {
        match trade.result {
            TradeResult::Won => self.wins += 1,
            TradeResult::Lost => self.losses += 1,
            TradeResult::Pending | TradeResult::Failed => return,
        }
        self.runs += 1;
        self.total_stake += trade.stake;
        self.profit += trade.profit;
        self.updated_at = trade.exit_at.unwrap_or_else(Utc::now);
    }

    /// Rebuild a rollup from trade history.
    pub fn from_trades<'a>(
        session: impl Into<String>,
        trades: impl IntoIterator<Item = &'a ExecutedTrade>,
    ) -> Self {
        let mut aggregate = Self::empty(session);
        for trade in trades {
            aggregate.record(trade);
        }
        aggregate
    }

    /// Wins over settled contracts, as a 0-100 percentage.
    #[must_use]
    pub fn win_rate(&self) -> Option<Decimal> {
        if self.runs == 0 {
            return None;
        }
        Some(Decimal::from(self.wins) * Decimal::ONE_HUNDRED / Decimal::from(self.runs))
    }
}
