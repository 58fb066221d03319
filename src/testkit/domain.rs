//! Builders for domain values used across tests.
//!
//! Keeps construction boilerplate out of the assertions.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    BalanceUpdate, ContractId, ContractStatus, ContractType, ContractUpdate, ExecutedTrade,
    Symbol, TickUpdate, TradeId, TradeRequest, TradeResult,
};

/// A terminal R_100 DIGITOVER 5 trade. Positive profit wins.
pub fn settled_trade(session: &str, contract_id: &str, stake: Decimal, profit: Decimal) -> ExecutedTrade {
    let won = profit > Decimal::ZERO;
    let entry_at = Utc::now() - Duration::seconds(2);
    ExecutedTrade {
        id: TradeId::new(),
        session: session.to_string(),
        contract_id: ContractId::new(contract_id),
        symbol: Symbol::new("R_100"),
        contract_type: ContractType::DigitOver,
        barrier: Some(5),
        stake,
        payout: if won { stake + profit } else { Decimal::ZERO },
        profit,
        result: if won { TradeResult::Won } else { TradeResult::Lost },
        entry_at,
        exit_at: Some(entry_at + Duration::seconds(2)),
    }
}

/// R_100 DIGITOVER 5, one tick, at `stake`.
///
/// # Panics
///
/// Panics if `stake` is not positive.
pub fn over_five(stake: Decimal) -> TradeRequest {
    TradeRequest::try_new("R_100", ContractType::DigitOver, Some(5), stake, 1)
        .expect("valid test request")
}

pub fn tick(symbol: &str, quote: &str, epoch: i64) -> TickUpdate {
    TickUpdate {
        symbol: Symbol::new(symbol),
        quote: quote.to_string(),
        epoch,
        pip_size: Some(2),
    }
}

/// Closing update for `contract_id`.
pub fn closing_update(contract_id: &ContractId, profit: Decimal, payout: Decimal) -> ContractUpdate {
    ContractUpdate {
        contract_id: contract_id.clone(),
        is_sold: true,
        status: Some(if profit > Decimal::ZERO {
            ContractStatus::Won
        } else {
            ContractStatus::Lost
        }),
        profit,
        payout,
        exit_epoch: Some(Utc::now().timestamp()),
    }
}

pub fn balance(amount: Decimal) -> BalanceUpdate {
    BalanceUpdate {
        balance: amount,
        currency: "USD".into(),
    }
}
