use std::time::Duration;

use crate::domain::{
    BalanceUpdate, ContractId, ExecutedTrade, HaltReason, RiskState, SessionAggregate,
    TradeRequest,
};
use crate::error::TradeError;

/// Typed events emitted by the engine for presentation layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Purchase confirmed; the trade is Pending until settlement.
    TradeOpened(ExecutedTrade),
    /// Terminal trade, with the session rollup after it was stored.
    TradeSettled {
        trade: ExecutedTrade,
        aggregate: Option<SessionAggregate>,
    },
    /// Submission failed before any stake was risked.
    TradeFailed {
        request: TradeRequest,
        error: TradeError,
    },
    RiskUpdated(RiskState),
    Halted { reason: HaltReason },
    Resumed(RiskState),
    /// A contract is still open past the warning threshold. Monitoring
    /// continues.
    SettlementOverdue {
        contract_id: ContractId,
        waited: Duration,
    },
    /// The ledger rejected a settled trade.
    PersistenceFailed { contract_id: ContractId, message: String },
    Balance(BalanceUpdate),
}

impl EngineEvent {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::TradeOpened(_) => "trade_opened",
            Self::TradeSettled { .. } => "trade_settled",
            Self::TradeFailed { .. } => "trade_failed",
            Self::RiskUpdated(_) => "risk_updated",
            Self::Halted { .. } => "halted",
            Self::Resumed(_) => "resumed",
            Self::SettlementOverdue { .. } => "settlement_overdue",
            Self::PersistenceFailed { .. } => "persistence_failed",
            Self::Balance(_) => "balance",
        }
    }
}
