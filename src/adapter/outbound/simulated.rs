//! Paper execution: contracts priced locally and settled from live ticks.
//!
//! A bought contract watches the normaliser's tick broadcast for its symbol.
//! Tick contracts settle on the `duration`-th tick after purchase; second
//! contracts on the first tick at or past `entry + duration`. The exit digit
//! decides the outcome with the usual digit-contract rules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::market::MarketDataNormalizer;
use crate::domain::{
    ContractId, ContractStatus, ContractUpdate, DurationUnit, Proposal, Purchase, StreamUpdate,
    TickObservation, TradeRequest,
};
use crate::error::TradeError;
use crate::port::{ContractMonitor, ExecutionBackend};

#[derive(Default)]
struct Book {
    /// Latest update per contract; the closing one once settled.
    updates: HashMap<ContractId, ContractUpdate>,
    watchers: HashMap<ContractId, Vec<mpsc::UnboundedSender<StreamUpdate>>>,
}

/// Paper [`ExecutionBackend`].
pub struct SimulatedBackend {
    normalizer: Arc<MarketDataNormalizer>,
    payout_ratio: Decimal,
    next_id: AtomicU64,
    book: Arc<Mutex<Book>>,
}

impl SimulatedBackend {
    #[must_use]
    pub fn new(normalizer: Arc<MarketDataNormalizer>, payout_ratio: Decimal) -> Self {
        Self {
            normalizer,
            payout_ratio,
            next_id: AtomicU64::new(1),
            book: Arc::new(Mutex::new(Book::default())),
        }
    }

    fn payout_for(&self, stake: Decimal) -> Decimal {
        (stake * self.payout_ratio).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Number of contracts not yet settled.
    #[must_use]
    pub fn open_contracts(&self) -> usize {
        self.book.lock().updates.values().filter(|u| !u.is_sold).count()
    }
}

/// Wait out the contract and publish its closing update.
async fn run_contract(
    book: Arc<Mutex<Book>>,
    mut ticks: broadcast::Receiver<TickObservation>,
    request: TradeRequest,
    contract_id: ContractId,
    stake: Decimal,
    payout: Decimal,
    entry_epoch: i64,
) {
    let mut seen: u32 = 0;
    let exit = loop {
        match ticks.recv().await {
            Ok(tick) if tick.symbol == request.symbol => {
                seen += 1;
                let done = match request.duration_unit {
                    DurationUnit::Ticks => seen >= request.duration.max(1),
                    DurationUnit::Seconds => tick.epoch >= entry_epoch + i64::from(request.duration),
                };
                if done {
                    break tick;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!(contract = %contract_id, skipped = n, "Simulated contract lagged"),
            Err(RecvError::Closed) => {
                warn!(contract = %contract_id, "Tick stream closed, simulated contract stays open");
                return;
            }
        }
    };

    let won = request.contract_type.wins(exit.digit, request.barrier);
    let update = ContractUpdate {
        contract_id: contract_id.clone(),
        is_sold: true,
        status: Some(if won { ContractStatus::Won } else { ContractStatus::Lost }),
        profit: if won { payout - stake } else { -stake },
        payout: if won { payout } else { Decimal::ZERO },
        exit_epoch: Some(exit.epoch),
    };
    info!(contract = %contract_id, digit = exit.digit, won, "Simulated contract settled");

    let mut book = book.lock();
    book.updates.insert(contract_id.clone(), update.clone());
    if let Some(watchers) = book.watchers.get_mut(&contract_id) {
        watchers.retain(|tx| tx.send(StreamUpdate::Contract(update.clone())).is_ok());
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn propose(&self, request: &TradeRequest) -> Result<Proposal, TradeError> {
        if request.stake <= Decimal::ZERO {
            return Err(TradeError::ProposalRejected("stake must be positive".into()));
        }
        Ok(Proposal {
            id: uuid::Uuid::new_v4().to_string(),
            ask_price: request.stake,
            payout: self.payout_for(request.stake),
        })
    }

    async fn buy(&self, request: &TradeRequest, proposal: &Proposal) -> Result<Purchase, TradeError> {
        let contract_id = ContractId::from(self.next_id.fetch_add(1, Ordering::Relaxed));
        let purchased_at = Utc::now();
        let entry_epoch = self
            .normalizer
            .latest(&request.symbol)
            .map_or_else(|| purchased_at.timestamp(), |t| t.epoch);

        self.book.lock().updates.insert(
            contract_id.clone(),
            ContractUpdate {
                contract_id: contract_id.clone(),
                is_sold: false,
                status: Some(ContractStatus::Open),
                profit: Decimal::ZERO,
                payout: proposal.payout,
                exit_epoch: None,
            },
        );
        tokio::spawn(run_contract(
            Arc::clone(&self.book),
            self.normalizer.subscribe(),
            request.clone(),
            contract_id.clone(),
            proposal.ask_price,
            proposal.payout,
            entry_epoch,
        ));
        debug!(contract = %contract_id, symbol = %request.symbol, "Simulated purchase");

        Ok(Purchase {
            contract_id,
            buy_price: proposal.ask_price,
            payout: proposal.payout,
            purchased_at,
        })
    }

    async fn monitor(&self, contract_id: &ContractId) -> Result<ContractMonitor, TradeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut book = self.book.lock();
        let Some(latest) = book.updates.get(contract_id).cloned() else {
            return Err(TradeError::BuyFailed(format!("unknown contract {contract_id}")));
        };
        let _ = tx.send(StreamUpdate::Contract(latest.clone()));
        if !latest.is_sold {
            book.watchers.entry(contract_id.clone()).or_default().push(tx);
        }
        Ok(ContractMonitor {
            contract_id: contract_id.clone(),
            subscription: None,
            updates: rx,
        })
    }

    async fn release(&self, monitor: &ContractMonitor) {
        let mut book = self.book.lock();
        book.watchers.remove(&monitor.contract_id);
        if book.updates.get(&monitor.contract_id).is_some_and(|u| u.is_sold) {
            book.updates.remove(&monitor.contract_id);
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
