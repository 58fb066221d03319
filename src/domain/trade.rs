//! Trade requests, venue confirmations and executed trades.
//!
//! A trade moves through three value types:
//!
//! - [`TradeRequest`] - what a caller wants (immutable)
//! - [`Proposal`] / [`Purchase`] - what the venue quoted and confirmed
//! - [`ExecutedTrade`] - the record created on buy confirmation, mutated
//!   exactly once at settlement via [`ExecutedTrade::settle`]

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::{ContractId, Symbol, TradeId};

/// Supported digit contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContractType {
    /// Last digit strictly greater than the barrier.
    DigitOver,
    /// Last digit strictly less than the barrier.
    DigitUnder,
    /// Last digit equal to the barrier.
    DigitMatch,
    /// Last digit different from the barrier.
    DigitDiff,
    DigitEven,
    DigitOdd,
}

impl ContractType {
    /// Venue wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DigitOver => "DIGITOVER",
            Self::DigitUnder => "DIGITUNDER",
            Self::DigitMatch => "DIGITMATCH",
            Self::DigitDiff => "DIGITDIFF",
            Self::DigitEven => "DIGITEVEN",
            Self::DigitOdd => "DIGITODD",
        }
    }

    /// Whether the contract is priced against a barrier digit.
    #[must_use]
    pub const fn needs_barrier(self) -> bool {
        matches!(
            self,
            Self::DigitOver | Self::DigitUnder | Self::DigitMatch | Self::DigitDiff
        )
    }

    /// Decide the contract outcome for an exit digit.
    ///
    /// Barrier contracts without a barrier never win.
    #[must_use]
    pub fn wins(self, digit: u8, barrier: Option<u8>) -> bool {
        match (self, barrier) {
            (Self::DigitOver, Some(b)) => digit > b,
            (Self::DigitUnder, Some(b)) => digit < b,
            (Self::DigitMatch, Some(b)) => digit == b,
            (Self::DigitDiff, Some(b)) => digit != b,
            (Self::DigitEven, _) => digit % 2 == 0,
            (Self::DigitOdd, _) => digit % 2 == 1,
            _ => false,
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContractType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DIGITOVER" => Ok(Self::DigitOver),
            "DIGITUNDER" => Ok(Self::DigitUnder),
            "DIGITMATCH" => Ok(Self::DigitMatch),
            "DIGITDIFF" => Ok(Self::DigitDiff),
            "DIGITEVEN" => Ok(Self::DigitEven),
            "DIGITODD" => Ok(Self::DigitOdd),
            _ => Err(DomainError::UnknownContractType { name: s.to_string() }),
        }
    }
}

/// Contract duration unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationUnit {
    /// Ticks.
    #[default]
    #[serde(rename = "t")]
    Ticks,
    /// Seconds.
    #[serde(rename = "s")]
    Seconds,
}

impl DurationUnit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ticks => "t",
            Self::Seconds => "s",
        }
    }
}

/// What a caller wants to trade. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: Symbol,
    pub contract_type: ContractType,
    pub barrier: Option<u8>,
    pub stake: Decimal,
    pub duration: u32,
    pub duration_unit: DurationUnit,
}

impl TradeRequest {
    /// Build a validated request.
    ///
    /// # Errors
    ///
    /// Returns an error if the stake is not positive or a barrier contract
    /// has no barrier digit in 0..=9.
    pub fn try_new(
        symbol: impl Into<Symbol>,
        contract_type: ContractType,
        barrier: Option<u8>,
        stake: Decimal,
        duration: u32,
    ) -> Result<Self, DomainError> {
        if stake <= Decimal::ZERO {
            return Err(DomainError::InvalidStake { stake });
        }
        if contract_type.needs_barrier() && !matches!(barrier, Some(0..=9)) {
            return Err(DomainError::MissingBarrier {
                contract_type: contract_type.as_str(),
            });
        }
        Ok(Self {
            symbol: symbol.into(),
            contract_type,
            barrier,
            stake,
            duration,
            duration_unit: DurationUnit::Ticks,
        })
    }

    /// Same request at a different stake.
    #[must_use]
    pub fn with_stake(&self, stake: Decimal) -> Self {
        Self {
            stake,
            ..self.clone()
        }
    }
}

/// A venue price quote for a specific contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub id: String,
    /// Price to pay (equals the stake for stake-basis proposals).
    pub ask_price: Decimal,
    pub payout: Decimal,
}

/// Venue confirmation of a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    pub contract_id: ContractId,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub purchased_at: DateTime<Utc>,
}

/// Venue-reported contract status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Open,
    Won,
    Lost,
    Sold,
}

/// One update from a contract-monitor subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractUpdate {
    pub contract_id: ContractId,
    /// Closed or sold; the first such update settles the trade.
    pub is_sold: bool,
    pub status: Option<ContractStatus>,
    pub profit: Decimal,
    pub payout: Decimal,
    pub exit_epoch: Option<i64>,
}

impl ContractUpdate {
    /// Terminal result carried by this update, if any.
    ///
    /// Uses the venue status when it names a winner or loser, and the sign of
    /// the profit otherwise.
    #[must_use]
    pub fn outcome(&self) -> Option<TradeResult> {
        if !self.is_sold {
            return None;
        }
        Some(match self.status {
            Some(ContractStatus::Won) => TradeResult::Won,
            Some(ContractStatus::Lost) => TradeResult::Lost,
            _ if self.profit > Decimal::ZERO => TradeResult::Won,
            _ => TradeResult::Lost,
        })
    }
}

/// Trade result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeResult {
    Pending,
    Won,
    Lost,
    Failed,
}

impl TradeResult {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Won => "won",
            Self::Lost => "lost",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl FromStr for TradeResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "won" => Ok(Self::Won),
            "lost" => Ok(Self::Lost),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown trade result '{other}'")),
        }
    }
}

/// Record of a purchased contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub id: TradeId,
    /// Session the trade was executed under.
    pub session: String,
    pub contract_id: ContractId,
    pub symbol: Symbol,
    pub contract_type: ContractType,
    pub barrier: Option<u8>,
    pub stake: Decimal,
    pub payout: Decimal,
    pub profit: Decimal,
    pub result: TradeResult,
    pub entry_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
}

impl ExecutedTrade {
    /// Create the pending record for a confirmed purchase.
    #[must_use]
    pub fn opened(session: impl Into<String>, request: &TradeRequest, purchase: &Purchase) -> Self {
        Self {
            id: TradeId::new(),
            session: session.into(),
            contract_id: purchase.contract_id.clone(),
            symbol: request.symbol.clone(),
            contract_type: request.contract_type,
            barrier: request.barrier,
            stake: purchase.buy_price,
            payout: purchase.payout,
            profit: Decimal::ZERO,
            result: TradeResult::Pending,
            entry_at: purchase.purchased_at,
            exit_at: None,
        }
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.result, TradeResult::Pending)
    }

    /// Apply a settlement update.
    ///
    /// Returns false (and leaves the trade untouched) if the trade is already
    /// terminal, the update is for another contract, or it is not a closing
    /// update.
    pub fn settle(&mut self, update: &ContractUpdate, at: DateTime<Utc>) -> bool {
        if !self.is_pending() || update.contract_id != self.contract_id {
            return false;
        }
        let Some(result) = update.outcome() else {
            return false;
        };
        self.result = result;
        self.profit = update.profit;
        self.payout = update.payout;
        self.exit_at = Some(at);
        true
    }
}
