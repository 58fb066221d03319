//! Trade execution engine.
//!
//! Drives one trade at a time through propose → buy → monitor → settle.
//! The slot below is the single source of truth for "a trade is in flight";
//! it is claimed atomically on submit and released only after settlement has
//! reached the stake controller and the ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

use super::event::EngineEvent;
use super::risk::StakeController;
use crate::domain::{
    ContractId, ContractUpdate, ExecutedTrade, HaltReason, Proposal, Purchase, StreamUpdate,
    TradeRequest,
};
use crate::error::TradeError;
use crate::infrastructure::config::execution::ExecutionConfig;
use crate::port::{ContractMonitor, ExecutionBackend, TradeLedger};

const EVENT_CAPACITY: usize = 1024;
/// Pause before re-opening a monitor stream that failed.
const REMONITOR_DELAY: Duration = Duration::from_secs(2);
/// Pause between inconclusive purchase verifications.
const VERIFY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Engine timing and identity.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Session name stamped on every trade.
    pub session: String,
    pub propose_timeout: Duration,
    pub buy_timeout: Duration,
    /// Warn (without giving up) when a contract stays open this long.
    pub settlement_warning: Duration,
}

impl EngineSettings {
    #[must_use]
    pub fn from_config(session: impl Into<String>, config: &ExecutionConfig) -> Self {
        Self {
            session: session.into(),
            propose_timeout: config.propose_timeout(),
            buy_timeout: config.buy_timeout(),
            settlement_warning: config.settlement_warning(),
        }
    }
}

/// The engine's single trade slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Idle,
    /// Proposal or purchase round trip in progress.
    Proposing,
    /// Bought; waiting for the authoritative settlement.
    Monitoring(ExecutedTrade),
    /// Settlement claimed; controller and ledger being updated.
    Settling(ContractId),
}

/// What woke the monitor task.
enum Wake {
    Update(Option<StreamUpdate>),
    Overdue,
}

impl Slot {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

pub struct TradeEngine {
    settings: EngineSettings,
    backend: Arc<dyn ExecutionBackend>,
    controller: Arc<StakeController>,
    ledger: Arc<dyn TradeLedger>,
    events: broadcast::Sender<EngineEvent>,
    slot: watch::Sender<Slot>,
}

impl TradeEngine {
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        backend: Arc<dyn ExecutionBackend>,
        controller: Arc<StakeController>,
        ledger: Arc<dyn TradeLedger>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (slot, _) = watch::channel(Slot::Idle);
        Self {
            settings,
            backend,
            controller,
            ledger,
            events,
            slot,
        }
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Sender side, for components publishing alongside the engine.
    #[must_use]
    pub fn event_sender(&self) -> broadcast::Sender<EngineEvent> {
        self.events.clone()
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<StakeController> {
        &self.controller
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.slot.borrow().clone()
    }

    /// The trade awaiting settlement, if any.
    #[must_use]
    pub fn in_flight(&self) -> Option<ExecutedTrade> {
        match &*self.slot.borrow() {
            Slot::Monitoring(trade) => Some(trade.clone()),
            _ => None,
        }
    }

    /// Resolve once no trade is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.slot.subscribe();
        let _ = rx.wait_for(Slot::is_idle).await;
    }

    /// Submit a trade.
    ///
    /// On success the returned trade is Pending and a monitor task owns it
    /// until settlement.
    ///
    /// # Errors
    ///
    /// [`TradeError::EngineBusy`] without touching the backend if the session
    /// is halted or a trade is already in flight. Otherwise the propose or
    /// buy failure; no stake is at risk for any error.
    pub async fn submit(self: &Arc<Self>, request: TradeRequest) -> Result<ExecutedTrade, TradeError> {
        if !self.controller.is_running() || !self.reserve() {
            debug!(symbol = %request.symbol, "Submission rejected, engine busy");
            return Err(TradeError::EngineBusy);
        }

        match self.open(&request).await {
            Ok(trade) => Ok(trade),
            Err(e) => {
                warn!(error = %e, symbol = %request.symbol, stake = %request.stake, "Trade failed");
                self.slot.send_replace(Slot::Idle);
                self.emit(EngineEvent::TradeFailed {
                    request,
                    error: e.clone(),
                });
                Err(e)
            }
        }
    }

    /// Claim the slot. False if a trade is in flight.
    fn reserve(&self) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_idle() {
                *slot = Slot::Proposing;
                true
            } else {
                false
            }
        })
    }

    async fn open(self: &Arc<Self>, request: &TradeRequest) -> Result<ExecutedTrade, TradeError> {
        let proposal = time::timeout(self.settings.propose_timeout, self.backend.propose(request))
            .await
            .map_err(|_| TradeError::Timeout { stage: "propose" })??;
        debug!(proposal = %proposal.id, ask = %proposal.ask_price, payout = %proposal.payout, "Proposal accepted");

        let purchase = self.buy(request, &proposal).await?;
        let trade = ExecutedTrade::opened(&self.settings.session, request, &purchase);
        info!(
            contract = %trade.contract_id,
            symbol = %trade.symbol,
            contract_type = %trade.contract_type,
            stake = %trade.stake,
            backend = self.backend.name(),
            "Trade opened"
        );

        let monitor = match self.backend.monitor(&trade.contract_id).await {
            Ok(monitor) => Some(monitor),
            Err(e) => {
                error!(contract = %trade.contract_id, error = %e, "Could not open monitor, retrying");
                None
            }
        };

        self.slot.send_replace(Slot::Monitoring(trade.clone()));
        self.emit(EngineEvent::TradeOpened(trade.clone()));
        tokio::spawn(Arc::clone(self).watch_contract(trade.clone(), monitor));
        Ok(trade)
    }

    /// Buy, verifying with the venue when no confirmation arrived.
    ///
    /// An unconfirmed buy keeps the slot claimed until the venue answers a
    /// portfolio query; only a definite "not found" becomes
    /// [`TradeError::BuyFailed`].
    async fn buy(&self, request: &TradeRequest, proposal: &Proposal) -> Result<Purchase, TradeError> {
        let sent_at = Utc::now();
        let outcome = time::timeout(self.settings.buy_timeout, self.backend.buy(request, proposal)).await;
        let ambiguous = match outcome {
            Ok(Ok(purchase)) => return Ok(purchase),
            Ok(Err(TradeError::Transport(e))) => TradeError::Transport(e),
            Ok(Err(e)) => return Err(e),
            Err(_) => TradeError::Timeout { stage: "buy" },
        };

        warn!(proposal = %proposal.id, error = %ambiguous, "Buy unconfirmed, verifying with venue");
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let verified = time::timeout(
                self.settings.buy_timeout,
                self.backend.verify_purchase(request, proposal, sent_at),
            )
            .await;
            match verified {
                Ok(Ok(Some(purchase))) => {
                    info!(contract = %purchase.contract_id, attempt, "Purchase found on venue");
                    return Ok(purchase);
                }
                Ok(Ok(None)) => {
                    return Err(TradeError::BuyFailed(format!(
                        "no contract found after {ambiguous}"
                    )));
                }
                Ok(Err(TradeError::Transport(e))) if e.is_fatal() => {
                    error!(proposal = %proposal.id, error = %e, "Connection closed, purchase state unknown");
                    return Err(TradeError::Transport(e));
                }
                Ok(Err(e)) => warn!(attempt, error = %e, "Purchase verification inconclusive"),
                Err(_) => warn!(attempt, "Purchase verification timed out"),
            }
            time::sleep(VERIFY_RETRY_DELAY).await;
        }
    }

    /// Follow a bought contract until it settles.
    async fn watch_contract(self: Arc<Self>, trade: ExecutedTrade, mut monitor: Option<ContractMonitor>) {
        let contract_id = trade.contract_id.clone();
        let started = Instant::now();
        let mut warn_at = started + self.settings.settlement_warning;

        loop {
            let Some(active) = monitor.as_mut() else {
                time::sleep(REMONITOR_DELAY).await;
                match self.backend.monitor(&contract_id).await {
                    Ok(reopened) => {
                        info!(contract = %contract_id, "Monitor re-opened");
                        monitor = Some(reopened);
                    }
                    Err(e) => warn!(contract = %contract_id, error = %e, "Monitor still unavailable"),
                }
                continue;
            };

            let wake = tokio::select! {
                update = active.updates.recv() => Wake::Update(update),
                () = time::sleep_until(warn_at) => Wake::Overdue,
            };

            match wake {
                Wake::Update(Some(StreamUpdate::Contract(update)))
                    if update.contract_id == contract_id =>
                {
                    if update.is_sold && self.settle(&trade, update).await {
                        break;
                    }
                }
                Wake::Update(Some(StreamUpdate::Error { code, message })) => {
                    warn!(contract = %contract_id, %code, %message, "Monitor stream rejected");
                    monitor = None;
                }
                Wake::Update(Some(other)) => debug!(?other, "Ignoring unrelated update"),
                Wake::Update(None) => {
                    warn!(contract = %contract_id, "Monitor stream ended before settlement");
                    monitor = None;
                }
                Wake::Overdue => {
                    let waited = started.elapsed();
                    warn!(contract = %contract_id, waited_secs = waited.as_secs(), "Settlement overdue, still waiting");
                    self.emit(EngineEvent::SettlementOverdue {
                        contract_id: contract_id.clone(),
                        waited,
                    });
                    warn_at += self.settings.settlement_warning;
                }
            }
        }

        if let Some(monitor) = monitor {
            self.backend.release(&monitor).await;
        }
        self.slot.send_replace(Slot::Idle);
    }

    /// Apply the first closing update for the in-flight trade.
    ///
    /// Returns false, changing nothing, for anything else.
    async fn settle(&self, trade: &ExecutedTrade, update: ContractUpdate) -> bool {
        let claimed = self.slot.send_if_modified(|slot| match slot {
            Slot::Monitoring(current) if current.contract_id == update.contract_id => {
                *slot = Slot::Settling(update.contract_id.clone());
                true
            }
            _ => false,
        });
        if !claimed {
            debug!(contract = %update.contract_id, "Duplicate settlement ignored");
            return false;
        }

        let mut settled = trade.clone();
        if !settled.settle(&update, Utc::now()) {
            self.slot.send_replace(Slot::Monitoring(trade.clone()));
            return false;
        }
        info!(
            contract = %settled.contract_id,
            result = settled.result.as_str(),
            profit = %settled.profit,
            "Trade settled"
        );

        let risk = self.controller.on_settlement(&settled);

        let aggregate = match self.ledger.append(&settled).await {
            Ok(aggregate) => Some(aggregate),
            Err(e) => {
                error!(contract = %settled.contract_id, error = %e, "Failed to record trade");
                self.emit(EngineEvent::PersistenceFailed {
                    contract_id: settled.contract_id.clone(),
                    message: e.to_string(),
                });
                let reason = HaltReason::PersistenceFailure {
                    message: e.to_string(),
                };
                if self.controller.halt(reason.clone()) {
                    self.emit(EngineEvent::Halted { reason });
                }
                None
            }
        };

        self.emit(EngineEvent::TradeSettled {
            trade: settled,
            aggregate,
        });
        if let Some(update) = risk {
            self.emit(EngineEvent::RiskUpdated(update.state));
            if let Some(reason) = update.halted {
                self.emit(EngineEvent::Halted { reason });
            }
        }
        true
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        debug!(event = event.label(), "Engine event");
        let _ = self.events.send(event);
    }
}
