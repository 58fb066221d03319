//! Venue-agnostic domain types.
//!
//! Nothing in here performs I/O: these are the values that flow between the
//! connection manager, the engine, the stake controller and the ledger.

pub mod error;
pub mod id;
pub mod risk;
pub mod session;
pub mod subscription;
pub mod tick;
pub mod trade;

pub use error::DomainError;
pub use id::{ContractId, ReqId, SubscriptionId, Symbol, TradeId};
pub use risk::{round_stake, HaltReason, RiskState, StakePlan};
pub use session::SessionAggregate;
pub use subscription::{
    BalanceUpdate, StreamUpdate, SubscriptionKind, SubscriptionSpec, SubscriptionTarget,
    TickUpdate,
};
pub use tick::{last_digit, TickObservation};
pub use trade::{
    ContractStatus, ContractType, ContractUpdate, DurationUnit, ExecutedTrade, Proposal, Purchase,
    TradeRequest, TradeResult,
};
