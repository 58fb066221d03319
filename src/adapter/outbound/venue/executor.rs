//! Live execution against the venue, over the shared connection.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::application::connection::ConnectionHandle;
use crate::domain::{ContractId, Proposal, Purchase, SubscriptionSpec, TradeRequest};
use crate::error::TradeError;
use crate::port::{ContractMonitor, ExecutionBackend, InboundBody, OpenContract, Outbound};

/// Purchase times are whole seconds on the wire.
const PURCHASE_TIME_SLACK: Duration = Duration::seconds(1);

/// Executes trades through the connection manager.
pub struct VenueBackend {
    connection: ConnectionHandle,
    currency: String,
}

impl VenueBackend {
    #[must_use]
    pub fn new(connection: ConnectionHandle, currency: impl Into<String>) -> Self {
        Self {
            connection,
            currency: currency.into(),
        }
    }

    /// Whether a portfolio entry is the purchase we were waiting for.
    fn matches(
        contract: &OpenContract,
        request: &TradeRequest,
        proposal: &Proposal,
        since: DateTime<Utc>,
    ) -> bool {
        contract.symbol == request.symbol.as_str()
            && contract.contract_type.eq_ignore_ascii_case(request.contract_type.as_str())
            && contract.buy_price == proposal.ask_price
            && contract.purchased_at >= since - PURCHASE_TIME_SLACK
    }
}

#[async_trait]
impl ExecutionBackend for VenueBackend {
    async fn propose(&self, request: &TradeRequest) -> Result<Proposal, TradeError> {
        let reply = self
            .connection
            .request(Outbound::Proposal {
                request: request.clone(),
                currency: self.currency.clone(),
            })
            .await?;
        match reply.body {
            InboundBody::Proposal(proposal) => Ok(proposal),
            InboundBody::Error(e) => Err(TradeError::ProposalRejected(format!("{}: {}", e.code, e.message))),
            other => Err(TradeError::ProposalRejected(format!("unexpected reply {other:?}"))),
        }
    }

    async fn buy(&self, _request: &TradeRequest, proposal: &Proposal) -> Result<Purchase, TradeError> {
        let reply = self
            .connection
            .request(Outbound::Buy {
                proposal_id: proposal.id.clone(),
                price: proposal.ask_price,
            })
            .await?;
        match reply.body {
            InboundBody::Bought(purchase) => Ok(purchase),
            InboundBody::Error(e) => Err(TradeError::BuyFailed(format!("{}: {}", e.code, e.message))),
            other => Err(TradeError::BuyFailed(format!("unexpected reply {other:?}"))),
        }
    }

    async fn verify_purchase(
        &self,
        request: &TradeRequest,
        proposal: &Proposal,
        since: DateTime<Utc>,
    ) -> Result<Option<Purchase>, TradeError> {
        let reply = self.connection.request(Outbound::Portfolio).await?;
        let contracts = match reply.body {
            InboundBody::Portfolio(contracts) => contracts,
            InboundBody::Error(e) => {
                warn!(code = %e.code, message = %e.message, "Portfolio query rejected");
                return Err(TradeError::BuyFailed(format!("portfolio: {}", e.message)));
            }
            other => return Err(TradeError::BuyFailed(format!("unexpected reply {other:?}"))),
        };
        debug!(open = contracts.len(), "Portfolio fetched for verification");

        let found = contracts
            .into_iter()
            .filter(|c| Self::matches(c, request, proposal, since))
            .max_by_key(|c| c.purchased_at)
            .map(|c| Purchase {
                contract_id: c.contract_id,
                buy_price: c.buy_price,
                payout: c.payout,
                purchased_at: c.purchased_at,
            });
        if let Some(purchase) = &found {
            info!(contract = %purchase.contract_id, "Unconfirmed purchase located in portfolio");
        }
        Ok(found)
    }

    async fn monitor(&self, contract_id: &ContractId) -> Result<ContractMonitor, TradeError> {
        let (subscription, updates) = self
            .connection
            .subscribe_channel(SubscriptionSpec::contract(contract_id.clone()))
            .await?;
        debug!(contract = %contract_id, %subscription, "Monitoring contract");
        Ok(ContractMonitor {
            contract_id: contract_id.clone(),
            subscription: Some(subscription),
            updates,
        })
    }

    async fn release(&self, monitor: &ContractMonitor) {
        if let Some(id) = monitor.subscription {
            if !self.connection.unsubscribe(id).await {
                debug!(contract = %monitor.contract_id, "Monitor already gone");
            }
        }
    }

    fn name(&self) -> &'static str {
        "venue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ContractType;
    use rust_decimal_macros::dec;

    fn request() -> TradeRequest {
        TradeRequest::try_new("R_100", ContractType::DigitOver, Some(5), dec!(1), 1).unwrap()
    }

    fn proposal() -> Proposal {
        Proposal {
            id: "p".into(),
            ask_price: dec!(1),
            payout: dec!(1.95),
        }
    }

    fn open(symbol: &str, price: rust_decimal::Decimal, at: DateTime<Utc>) -> OpenContract {
        OpenContract {
            contract_id: ContractId::from("7"),
            symbol: symbol.into(),
            contract_type: "DIGITOVER".into(),
            buy_price: price,
            payout: dec!(1.95),
            purchased_at: at,
        }
    }

    #[test]
    fn portfolio_match_requires_same_contract_after_send() {
        let since = Utc::now();
        assert!(VenueBackend::matches(&open("R_100", dec!(1), since), &request(), &proposal(), since));
        assert!(!VenueBackend::matches(&open("R_50", dec!(1), since), &request(), &proposal(), since));
        assert!(!VenueBackend::matches(&open("R_100", dec!(2), since), &request(), &proposal(), since));
        assert!(!VenueBackend::matches(
            &open("R_100", dec!(1), since - Duration::seconds(30)),
            &request(),
            &proposal(),
            since
        ));
    }
}
