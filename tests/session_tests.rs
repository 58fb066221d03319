//! Session runner: autonomous loop, stop semantics, auto-restart.

mod harness;

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stakerunner::application::connection::{ConnectionManager, ConnectionOptions};
use stakerunner::application::engine::{EngineSettings, TradeEngine};
use stakerunner::application::event::EngineEvent;
use stakerunner::application::risk::StakeController;
use stakerunner::application::session::Session;
use stakerunner::domain::HaltReason;
use stakerunner::error::TradeError;
use stakerunner::infrastructure::config::execution::ExecutionConfig;
use stakerunner::infrastructure::config::strategy::StrategyConfig;
use stakerunner::port::TradeLedger;
use stakerunner::testkit;
use stakerunner::testkit::backend::ScriptedBackend;
use stakerunner::testkit::domain::over_five;
use stakerunner::testkit::transport::ScriptedTransport;
use tokio::sync::broadcast;

use harness::temp_db::TempDb;

struct Rig {
    session: Arc<Session>,
    backend: Arc<ScriptedBackend>,
    ledger: Arc<dyn TradeLedger>,
    _db: TempDb,
}

fn rig(strategy: StrategyConfig) -> Rig {
    let db = TempDb::create(&strategy.session);
    let ledger: Arc<dyn TradeLedger> = Arc::new(db.ledger());
    let backend = Arc::new(ScriptedBackend::new());
    let engine = Arc::new(TradeEngine::new(
        EngineSettings::from_config(strategy.session.as_str(), &ExecutionConfig::default()),
        backend.clone(),
        Arc::new(StakeController::new(strategy.stake_plan())),
        Arc::clone(&ledger),
    ));
    Rig {
        session: Arc::new(Session::new(engine, Arc::clone(&ledger), strategy)),
        backend,
        ledger,
        _db: db,
    }
}

/// Settle every opened trade with `profit` until `stop` matches an event.
async fn settle_until(
    events: &mut broadcast::Receiver<EngineEvent>,
    backend: &ScriptedBackend,
    profit: Decimal,
    stop: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    loop {
        let event = events.recv().await.unwrap();
        if let EngineEvent::TradeOpened(trade) = &event {
            assert!(backend.settle(&trade.contract_id, profit));
        }
        if stop(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn autonomous_loop_trades_until_target() {
    let rig = rig(StrategyConfig {
        target_profit: dec!(2),
        ..testkit::config::strategy("loop")
    });
    let mut events = rig.session.events();
    assert!(rig.session.start());
    assert!(!rig.session.start());

    let halted = settle_until(&mut events, &rig.backend, dec!(0.95), |e| {
        matches!(e, EngineEvent::Halted { .. })
    })
    .await;
    assert_eq!(
        halted,
        EngineEvent::Halted {
            reason: HaltReason::TargetReached { profit: dec!(2.85) }
        }
    );

    rig.session.engine().wait_idle().await;
    assert_eq!(rig.backend.calls().propose, 3);
    let aggregate = rig.session.aggregate().await.unwrap().unwrap();
    assert_eq!(aggregate.wins, 3);

    let err = rig.session.submit(over_five(dec!(1))).await.unwrap_err();
    assert_eq!(err, TradeError::EngineBusy);
}

#[tokio::test]
async fn losses_walk_the_ladder_in_the_loop() {
    let rig = rig(testkit::config::strategy("ladder"));
    let mut events = rig.session.events();
    rig.session.start();

    let mut stakes = Vec::new();
    while stakes.len() < 4 {
        if let EngineEvent::TradeOpened(trade) = events.recv().await.unwrap() {
            stakes.push(trade.stake);
            if stakes.len() == 4 {
                rig.session.stop();
            }
            rig.backend.settle(&trade.contract_id, -trade.stake);
        }
    }
    rig.session.engine().wait_idle().await;

    assert_eq!(stakes, vec![dec!(1), dec!(2), dec!(4), dec!(1)]);
    let aggregate = rig.session.aggregate().await.unwrap().unwrap();
    assert_eq!(aggregate.losses, 4);
    assert_eq!(aggregate.profit, dec!(-8));
}

#[tokio::test]
async fn stop_keeps_monitoring_the_open_trade() {
    let rig = rig(testkit::config::strategy("stop"));
    let mut events = rig.session.events();
    assert!(rig.session.start_manual());

    let trade = rig.session.submit(over_five(dec!(1))).await.unwrap();
    assert!(rig.session.stop());
    assert!(!rig.session.stop());
    assert_eq!(
        rig.session.in_flight().map(|t| t.contract_id),
        Some(trade.contract_id.clone())
    );

    rig.backend.settle(&trade.contract_id, dec!(0.95));
    let settled = loop {
        if let EngineEvent::TradeSettled { trade, aggregate } = events.recv().await.unwrap() {
            break (trade, aggregate);
        }
    };
    assert_eq!(settled.0.profit, dec!(0.95));
    assert_eq!(settled.1.map(|a| a.runs), Some(1));

    let risk = rig.session.risk();
    assert!(!risk.running);
    assert_eq!(risk.halt_reason, Some(HaltReason::Stopped));
    assert_eq!(risk.total_wins, 1);
    assert_eq!(rig.ledger.aggregate("stop").await.unwrap().unwrap().runs, 1);
}

#[tokio::test]
async fn restart_waits_for_the_previous_trade_to_settle() {
    let rig = rig(testkit::config::strategy("restart"));
    assert!(rig.session.start_manual());
    let trade = rig.session.submit(over_five(dec!(1))).await.unwrap();
    assert!(rig.session.stop());

    assert!(!rig.session.start());
    assert!(!rig.session.start_manual());
    assert!(!rig.session.risk().running);

    assert!(rig.backend.settle(&trade.contract_id, dec!(-1)));
    rig.session.engine().wait_idle().await;
    assert_eq!(rig.session.risk().current_stake, dec!(2));

    assert!(rig.session.start_manual());
    let risk = rig.session.risk();
    assert_eq!(risk.current_stake, dec!(1));
    assert_eq!(risk.consecutive_losses, 0);
    assert_eq!(risk.total_losses, 0);
    assert_eq!(risk.session_profit, Decimal::ZERO);
    assert_eq!(rig.session.aggregate().await.unwrap().unwrap().losses, 1);
}

#[tokio::test]
async fn failed_submission_is_retried() {
    let rig = rig(testkit::config::strategy("retry"));
    rig.backend
        .push_proposal(Err(TradeError::ProposalRejected("MarketIsClosed".into())));
    let mut events = rig.session.events();
    rig.session.start();

    let failed = loop {
        if let EngineEvent::TradeFailed { error, .. } = events.recv().await.unwrap() {
            break error;
        }
    };
    assert_eq!(failed, TradeError::ProposalRejected("MarketIsClosed".into()));

    loop {
        if let EngineEvent::TradeOpened(_) = events.recv().await.unwrap() {
            break;
        }
    }
    assert_eq!(rig.backend.calls().propose, 2);
    rig.session.stop();
}

#[tokio::test(start_paused = true)]
async fn target_halt_restarts_after_cooldown() {
    let rig = rig(StrategyConfig {
        target_profit: dec!(0.5),
        auto_restart_cooldown_secs: Some(60),
        ..testkit::config::strategy("cooldown")
    });
    let mut events = rig.session.events();
    rig.session.start();
    let started = tokio::time::Instant::now();

    settle_until(&mut events, &rig.backend, dec!(0.95), |e| {
        matches!(e, EngineEvent::Halted { .. })
    })
    .await;

    let resumed = loop {
        if let EngineEvent::Resumed(state) = events.recv().await.unwrap() {
            break state;
        }
    };
    assert!(started.elapsed().as_secs() >= 60);
    assert!(resumed.running);
    assert_eq!(resumed.session_profit, Decimal::ZERO);
    assert_eq!(resumed.current_stake, dec!(1));

    loop {
        if let EngineEvent::TradeOpened(_) = events.recv().await.unwrap() {
            break;
        }
    }
    rig.session.stop();
    assert_eq!(rig.session.aggregate().await.unwrap().unwrap().runs, 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_connection_loss_halts_the_session() {
    let (transport, venue) = ScriptedTransport::new();
    let (connection, _driver) = ConnectionManager::spawn(
        transport,
        ConnectionOptions {
            connection: testkit::config::connection(16),
            reconnection: testkit::config::reconnection(1),
            token: None,
        },
    );
    connection.connect().await.unwrap();

    let rig = rig(testkit::config::strategy("fatal"));
    let _watch = rig.session.watch_connection(connection.events());
    let mut events = rig.session.events();
    rig.session.start_manual();

    venue.fail_next_connects(10);
    venue.drop_link("gone");

    let reason = loop {
        if let EngineEvent::Halted { reason } = events.recv().await.unwrap() {
            break reason;
        }
    };
    assert!(matches!(reason, HaltReason::ConnectionLost { ref message } if message.contains("exhausted")));
    assert!(!rig.session.risk().running);
}
