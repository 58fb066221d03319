//! Stake controller.
//!
//! Owns the session's [`RiskState`]. Settlements are the only thing that
//! moves the stake ladder; start/stop/halt are the only things that flip the
//! running flag.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::{ContractId, ExecutedTrade, HaltReason, RiskState, StakePlan, TradeResult};

/// Result of applying one settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskUpdate {
    pub state: RiskState,
    /// Set when this settlement halted the session.
    pub halted: Option<HaltReason>,
}

#[derive(Debug)]
struct Inner {
    state: RiskState,
    /// Contracts already applied this session.
    settled: HashSet<ContractId>,
}

/// Martingale stake progression with a loss ceiling and profit target.
#[derive(Debug)]
pub struct StakeController {
    plan: StakePlan,
    inner: Mutex<Inner>,
}

impl StakeController {
    /// Create a stopped controller at the base stake.
    #[must_use]
    pub fn new(plan: StakePlan) -> Self {
        let state = RiskState::new(&plan);
        Self {
            plan,
            inner: Mutex::new(Inner {
                state,
                settled: HashSet::new(),
            }),
        }
    }

    #[must_use]
    pub const fn plan(&self) -> &StakePlan {
        &self.plan
    }

    #[must_use]
    pub fn snapshot(&self) -> RiskState {
        self.inner.lock().state.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock().state.running
    }

    #[must_use]
    pub fn current_stake(&self) -> rust_decimal::Decimal {
        self.inner.lock().state.current_stake
    }

    /// Begin a session with fresh counters.
    ///
    /// Returns `None` if already running.
    pub fn start(&self) -> Option<RiskState> {
        let mut inner = self.inner.lock();
        if inner.state.running {
            return None;
        }
        inner.state = RiskState::new(&self.plan);
        inner.state.running = true;
        inner.settled.clear();
        info!(stake = %inner.state.current_stake, "Session started");
        Some(inner.state.clone())
    }

    /// Stop accepting trades. Returns false if already halted.
    pub fn halt(&self, reason: HaltReason) -> bool {
        let mut inner = self.inner.lock();
        if !inner.state.running {
            return false;
        }
        inner.state.running = false;
        info!(%reason, profit = %inner.state.session_profit, "Session halted");
        inner.state.halt_reason = Some(reason);
        true
    }

    /// Apply a settled trade.
    ///
    /// Returns `None` for non-settled trades and for contracts already
    /// applied, so a repeated settlement never moves the counters twice.
    pub fn on_settlement(&self, trade: &ExecutedTrade) -> Option<RiskUpdate> {
        if !matches!(trade.result, TradeResult::Won | TradeResult::Lost) {
            return None;
        }
        let mut inner = self.inner.lock();
        if !inner.settled.insert(trade.contract_id.clone()) {
            warn!(contract = %trade.contract_id, "Settlement already applied");
            return None;
        }

        let plan = &self.plan;
        let state = &mut inner.state;
        match trade.result {
            TradeResult::Won => {
                state.consecutive_losses = 0;
                state.current_stake = plan.stake_for(0);
                state.total_wins += 1;
            }
            _ => {
                state.total_losses += 1;
                state.consecutive_losses += 1;
                if state.consecutive_losses >= plan.max_consecutive_losses {
                    warn!(
                        losses = state.consecutive_losses,
                        "Loss ceiling reached, resetting to base stake"
                    );
                    state.consecutive_losses = 0;
                }
                state.current_stake = plan.stake_for(state.consecutive_losses);
            }
        }
        state.session_profit += trade.profit;

        let mut halted = None;
        if state.running && state.session_profit >= plan.target_profit {
            let reason = HaltReason::TargetReached {
                profit: state.session_profit,
            };
            info!(profit = %state.session_profit, target = %plan.target_profit, "Profit target reached");
            state.running = false;
            state.halt_reason = Some(reason.clone());
            halted = Some(reason);
        }

        Some(RiskUpdate {
            state: state.clone(),
            halted,
        })
    }
}
