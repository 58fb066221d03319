//! Session runner: the start/stop/submit surface presentation layers drive.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::connection::ConnectionEvent;
use super::engine::TradeEngine;
use super::event::EngineEvent;
use crate::domain::{ExecutedTrade, HaltReason, RiskState, SessionAggregate, TradeRequest};
use crate::error::{Result, TradeError};
use crate::infrastructure::config::strategy::StrategyConfig;
use crate::port::{HistoryQuery, TradeLedger};

/// One strategy instance bound to an engine.
pub struct Session {
    engine: Arc<TradeEngine>,
    ledger: Arc<dyn TradeLedger>,
    strategy: StrategyConfig,
    runner: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Session {
    #[must_use]
    pub fn new(engine: Arc<TradeEngine>, ledger: Arc<dyn TradeLedger>, strategy: StrategyConfig) -> Self {
        Self {
            engine,
            ledger,
            strategy,
            runner: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.strategy.session
    }

    #[must_use]
    pub const fn engine(&self) -> &Arc<TradeEngine> {
        &self.engine
    }

    /// Start the autonomous loop with fresh counters.
    ///
    /// Returns false if the session is already running or a trade from the
    /// previous run has not settled yet.
    pub fn start(&self) -> bool {
        if !self.start_manual() {
            return false;
        }
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.engine),
            self.strategy.clone(),
            stop_rx,
        ));
        if let Some((previous, _)) = self.runner.lock().replace((stop_tx, task)) {
            let _ = previous.send(true);
        }
        true
    }

    /// Mark the session running without the autonomous loop; trades are
    /// then submitted by the caller.
    ///
    /// Refused while a trade is in flight, so its settlement lands in the
    /// run that opened it.
    pub fn start_manual(&self) -> bool {
        if !self.engine.slot().is_idle() {
            warn!(session = %self.strategy.session, "Previous trade still in flight, not starting");
            return false;
        }
        let Some(state) = self.engine.controller().start() else {
            return false;
        };
        info!(session = %self.strategy.session, backend = self.engine.backend_name(), "Session running");
        self.engine.emit(EngineEvent::Resumed(state));
        true
    }

    /// Halt the session. A trade already in flight keeps being monitored
    /// until it settles.
    pub fn stop(&self) -> bool {
        self.halt(HaltReason::Stopped)
    }

    fn halt(&self, reason: HaltReason) -> bool {
        if let Some((stop, _)) = self.runner.lock().take() {
            let _ = stop.send(true);
        }
        let halted = self.engine.controller().halt(reason.clone());
        if halted {
            info!(session = %self.strategy.session, %reason, "Session halted");
            self.engine.emit(EngineEvent::Halted { reason });
        }
        halted
    }

    /// Halt with [`HaltReason::ConnectionLost`] once the connection closes
    /// for good.
    pub fn watch_connection(self: &Arc<Self>, mut events: broadcast::Receiver<ConnectionEvent>) -> JoinHandle<()> {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ConnectionEvent::Fatal(e)) => {
                        if let Some(session) = session.upgrade() {
                            error!(error = %e, "Connection closed for good");
                            session.halt(HaltReason::ConnectionLost {
                                message: e.to_string(),
                            });
                        }
                        break;
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Submit one trade outside the autonomous loop.
    ///
    /// # Errors
    ///
    /// See [`TradeEngine::submit`].
    pub async fn submit(&self, request: TradeRequest) -> std::result::Result<ExecutedTrade, TradeError> {
        self.engine.submit(request).await
    }

    #[must_use]
    pub fn risk(&self) -> RiskState {
        self.engine.controller().snapshot()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.events()
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<ExecutedTrade> {
        self.engine.in_flight()
    }

    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<ExecutedTrade>> {
        self.ledger.history(query).await
    }

    /// Durable rollup for this session's name.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn aggregate(&self) -> Result<Option<SessionAggregate>> {
        self.ledger.aggregate(&self.strategy.session).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some((stop, _)) = self.runner.get_mut().take() {
            let _ = stop.send(true);
        }
    }
}

/// Submit, wait for settlement, repeat until halted or stopped.
async fn run_loop(engine: Arc<TradeEngine>, strategy: StrategyConfig, mut stop: watch::Receiver<bool>) {
    let controller = Arc::clone(engine.controller());
    loop {
        if *stop.borrow() {
            break;
        }

        tokio::select! {
            () = engine.wait_idle() => {}
            _ = stop.changed() => break,
        }

        if !controller.is_running() {
            let reason = controller.snapshot().halt_reason;
            let Some(cooldown) = strategy.auto_restart_cooldown() else {
                debug!(?reason, "Session halted, loop exiting");
                break;
            };
            if !matches!(reason, Some(HaltReason::TargetReached { .. })) {
                break;
            }
            info!(cooldown_secs = cooldown.as_secs(), "Target reached, restarting after cooldown");
            tokio::select! {
                () = time::sleep(cooldown) => {}
                _ = stop.changed() => break,
            }
            if let Some(state) = controller.start() {
                info!(session = %strategy.session, "Session restarted");
                engine.emit(EngineEvent::Resumed(state));
            }
            continue;
        }

        let request = match strategy.request(controller.current_stake()) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Strategy produced an invalid request");
                break;
            }
        };

        match engine.submit(request).await {
            Ok(trade) => debug!(contract = %trade.contract_id, "Awaiting settlement"),
            Err(TradeError::EngineBusy) => {}
            Err(e) => {
                warn!(error = %e, retry_ms = strategy.retry_delay_ms, "Submission failed, retrying");
                tokio::select! {
                    () = time::sleep(strategy.retry_delay()) => {}
                    _ = stop.changed() => break,
                }
            }
        }
    }
    debug!(session = %strategy.session, "Autonomous loop stopped");
}
