//! Execution backend port.
//!
//! The trade engine drives one state machine regardless of where contracts
//! are actually bought. Backends supply the four venue interactions: price a
//! contract, buy it, watch it until it settles, and verify a purchase whose
//! confirmation never arrived.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::{ContractId, Proposal, Purchase, StreamUpdate, SubscriptionId, TradeRequest};
use crate::error::TradeError;

/// Live view of one contract.
///
/// `updates` stays open across reconnects: the backend re-binds the stream
/// and keeps delivering into the same channel.
#[derive(Debug)]
pub struct ContractMonitor {
    pub contract_id: ContractId,
    pub subscription: Option<SubscriptionId>,
    pub updates: mpsc::UnboundedReceiver<StreamUpdate>,
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Request a price for the contract. Rejection risks no stake.
    async fn propose(&self, request: &TradeRequest) -> Result<Proposal, TradeError>;

    /// Buy a priced contract.
    async fn buy(&self, request: &TradeRequest, proposal: &Proposal) -> Result<Purchase, TradeError>;

    /// Look for a purchase of `proposal` made at or after `since`.
    ///
    /// Called when a buy ended without a confirmation (timeout, dropped
    /// link). `Ok(None)` means the venue shows no such contract.
    async fn verify_purchase(
        &self,
        _request: &TradeRequest,
        _proposal: &Proposal,
        _since: DateTime<Utc>,
    ) -> Result<Option<Purchase>, TradeError> {
        Ok(None)
    }

    /// Start streaming settlement updates for a bought contract.
    async fn monitor(&self, contract_id: &ContractId) -> Result<ContractMonitor, TradeError>;

    /// Stop streaming for a settled contract.
    async fn release(&self, monitor: &ContractMonitor);

    fn name(&self) -> &'static str;
}
