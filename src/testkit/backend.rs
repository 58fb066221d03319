//! Scripted [`ExecutionBackend`] for engine and session tests.
//!
//! Proposals and buys succeed by default; tests queue other outcomes and
//! drive settlement by pushing contract updates into open monitors.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::mpsc;

use crate::domain::{
    ContractId, ContractStatus, ContractUpdate, Proposal, Purchase, StreamUpdate, TradeRequest,
};
use crate::error::TradeError;
use crate::port::{ContractMonitor, ExecutionBackend};

/// How the next `buy` behaves.
#[derive(Debug, Clone)]
pub enum BuyScript {
    Confirm,
    /// Never answers; the engine's buy timeout fires.
    Hang,
    Fail(TradeError),
}

/// Backend call counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub propose: usize,
    pub buy: usize,
    pub verify: usize,
    pub monitor: usize,
    pub release: usize,
}

#[derive(Default)]
struct State {
    calls: Calls,
    proposals: VecDeque<Result<Proposal, TradeError>>,
    buys: VecDeque<BuyScript>,
    hung_proposals: usize,
    verify_failures: VecDeque<TradeError>,
    verified: bool,
    next_contract: u64,
    requests: Vec<TradeRequest>,
    monitors: HashMap<ContractId, mpsc::UnboundedSender<StreamUpdate>>,
}

impl State {
    fn purchase(&mut self, proposal: &Proposal, purchased_at: DateTime<Utc>) -> Purchase {
        self.next_contract += 1;
        Purchase {
            contract_id: ContractId::from(1000 + self.next_contract),
            buy_price: proposal.ask_price,
            payout: proposal.payout,
            purchased_at,
        }
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    state: Mutex<State>,
}

impl ScriptedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn calls(&self) -> Calls {
        self.state.lock().calls
    }

    /// Every request proposed, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<TradeRequest> {
        self.state.lock().requests.clone()
    }

    /// Queue the outcome of a future `propose`.
    pub fn push_proposal(&self, proposal: Result<Proposal, TradeError>) {
        self.state.lock().proposals.push_back(proposal);
    }

    /// Queue the behaviour of a future `buy`.
    pub fn push_buy(&self, script: BuyScript) {
        self.state.lock().buys.push_back(script);
    }

    /// The next `n` proposals never answer.
    pub fn hang_proposals(&self, n: usize) {
        self.state.lock().hung_proposals = n;
    }

    /// Fail a future `verify_purchase` with `error` before it consults the
    /// venue's portfolio.
    pub fn push_verify_failure(&self, error: TradeError) {
        self.state.lock().verify_failures.push_back(error);
    }

    /// Whether `verify_purchase` finds the contract.
    pub fn set_verified(&self, verified: bool) {
        self.state.lock().verified = verified;
    }

    /// Deliver an update to the contract's monitor. False if none is open.
    pub fn push_update(&self, contract_id: &ContractId, update: ContractUpdate) -> bool {
        self.state
            .lock()
            .monitors
            .get(contract_id)
            .is_some_and(|tx| tx.send(StreamUpdate::Contract(update)).is_ok())
    }

    /// Close the contract with `profit`. A positive profit wins.
    pub fn settle(&self, contract_id: &ContractId, profit: Decimal) -> bool {
        let won = profit > Decimal::ZERO;
        self.push_update(
            contract_id,
            ContractUpdate {
                contract_id: contract_id.clone(),
                is_sold: true,
                status: Some(if won { ContractStatus::Won } else { ContractStatus::Lost }),
                profit,
                payout: if won { profit.abs() + Decimal::ONE } else { Decimal::ZERO },
                exit_epoch: Some(Utc::now().timestamp()),
            },
        )
    }

    /// End the contract's monitor stream without settling it.
    pub fn drop_monitor(&self, contract_id: &ContractId) -> bool {
        self.state.lock().monitors.remove(contract_id).is_some()
    }
}

#[async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn propose(&self, request: &TradeRequest) -> Result<Proposal, TradeError> {
        let outcome = {
            let mut state = self.state.lock();
            state.calls.propose += 1;
            state.requests.push(request.clone());
            if state.hung_proposals > 0 {
                state.hung_proposals -= 1;
                None
            } else {
                let n = state.calls.propose;
                Some(state.proposals.pop_front().unwrap_or_else(|| {
                    Ok(Proposal {
                        id: format!("proposal-{n}"),
                        ask_price: request.stake,
                        payout: (request.stake * Decimal::new(195, 2))
                            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
                    })
                }))
            }
        };
        match outcome {
            Some(proposal) => proposal,
            None => std::future::pending().await,
        }
    }

    async fn buy(&self, _request: &TradeRequest, proposal: &Proposal) -> Result<Purchase, TradeError> {
        let script = {
            let mut state = self.state.lock();
            state.calls.buy += 1;
            state.buys.pop_front().unwrap_or(BuyScript::Confirm)
        };
        match script {
            BuyScript::Confirm => Ok(self.state.lock().purchase(proposal, Utc::now())),
            BuyScript::Hang => std::future::pending().await,
            BuyScript::Fail(e) => Err(e),
        }
    }

    async fn verify_purchase(
        &self,
        _request: &TradeRequest,
        proposal: &Proposal,
        since: DateTime<Utc>,
    ) -> Result<Option<Purchase>, TradeError> {
        let mut state = self.state.lock();
        state.calls.verify += 1;
        if let Some(error) = state.verify_failures.pop_front() {
            return Err(error);
        }
        if state.verified {
            Ok(Some(state.purchase(proposal, since)))
        } else {
            Ok(None)
        }
    }

    async fn monitor(&self, contract_id: &ContractId) -> Result<ContractMonitor, TradeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.calls.monitor += 1;
        state.monitors.insert(contract_id.clone(), tx);
        Ok(ContractMonitor {
            contract_id: contract_id.clone(),
            subscription: None,
            updates: rx,
        })
    }

    async fn release(&self, monitor: &ContractMonitor) {
        let mut state = self.state.lock();
        state.calls.release += 1;
        state.monitors.remove(&monitor.contract_id);
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
