//! Engine scenarios over a scripted venue and a file-backed ledger.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stakerunner::adapter::outbound::venue::VenueBackend;
use stakerunner::application::connection::{ConnectionManager, ConnectionOptions};
use stakerunner::application::engine::{EngineSettings, TradeEngine};
use stakerunner::application::risk::StakeController;
use stakerunner::domain::{
    ContractId, HaltReason, StakePlan, SubscriptionSpec, TradeResult,
};
use stakerunner::error::TradeError;
use stakerunner::infrastructure::config::connection::ReconnectionConfig;
use stakerunner::port::{
    ApiToken, ExecutionBackend, HistoryQuery, InboundBody, OpenContract, Outbound, TradeLedger,
};
use stakerunner::testkit;
use stakerunner::testkit::backend::ScriptedBackend;
use stakerunner::testkit::domain::over_five;
use stakerunner::testkit::transport::{reply, stream_message, ScriptedTransport};

use harness::temp_db::TempDb;
use harness::venue::{closing_update, trading_venue, CONTRACT};

fn settings(session: &str) -> EngineSettings {
    EngineSettings {
        session: session.into(),
        propose_timeout: Duration::from_secs(5),
        buy_timeout: Duration::from_secs(5),
        settlement_warning: Duration::from_secs(60),
    }
}

fn plan(target: Decimal) -> StakePlan {
    StakePlan {
        base_stake: dec!(1),
        multiplier: dec!(2),
        max_consecutive_losses: 3,
        target_profit: target,
    }
}

fn engine(
    session: &str,
    target: Decimal,
    backend: Arc<dyn ExecutionBackend>,
    ledger: Arc<dyn TradeLedger>,
) -> Arc<TradeEngine> {
    let controller = Arc::new(StakeController::new(plan(target)));
    controller.start();
    Arc::new(TradeEngine::new(settings(session), backend, controller, ledger))
}

/// Submit at the controller's stake and settle with `profit_of(stake)`.
async fn trade_once(
    engine: &Arc<TradeEngine>,
    backend: &ScriptedBackend,
    profit_of: impl Fn(Decimal) -> Decimal,
) {
    let stake = engine.controller().current_stake();
    let trade = engine.submit(over_five(stake)).await.unwrap();
    assert!(backend.settle(&trade.contract_id, profit_of(stake)));
    engine.wait_idle().await;
}

#[tokio::test]
async fn three_losses_then_a_win_walks_the_ladder() {
    let db = TempDb::create("ladder");
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine("ladder", dec!(100), backend.clone(), Arc::new(db.ledger()));

    for _ in 0..3 {
        trade_once(&engine, &backend, |stake| -stake).await;
    }
    let after_losses = engine.controller().snapshot();
    assert_eq!(after_losses.current_stake, dec!(1));
    assert_eq!(after_losses.consecutive_losses, 0);

    trade_once(&engine, &backend, |_| dec!(0.95)).await;

    let stakes: Vec<_> = backend.requests().iter().map(|r| r.stake).collect();
    assert_eq!(stakes, vec![dec!(1), dec!(2), dec!(4), dec!(1)]);
    let risk = engine.controller().snapshot();
    assert_eq!(risk.current_stake, dec!(1));
    assert_eq!(risk.consecutive_losses, 0);
    assert_eq!(risk.session_profit, dec!(-6.05));
}

#[tokio::test]
async fn reaching_target_rejects_until_restart() {
    let db = TempDb::create("target");
    let backend = Arc::new(ScriptedBackend::new());
    let engine = engine("target", dec!(1.5), backend.clone(), Arc::new(db.ledger()));

    trade_once(&engine, &backend, |_| dec!(0.95)).await;
    assert!(engine.controller().is_running());
    trade_once(&engine, &backend, |_| dec!(0.95)).await;

    let risk = engine.controller().snapshot();
    assert!(!risk.running);
    assert_eq!(risk.halt_reason, Some(HaltReason::TargetReached { profit: dec!(1.90) }));

    for _ in 0..3 {
        let err = engine.submit(over_five(dec!(1))).await.unwrap_err();
        assert_eq!(err, TradeError::EngineBusy);
    }
    assert_eq!(backend.calls().propose, 2);

    let restarted = engine.controller().start().unwrap();
    assert_eq!(restarted.session_profit, Decimal::ZERO);
    assert!(engine.submit(over_five(dec!(1))).await.is_ok());
    assert_eq!(backend.calls().propose, 3);
}

#[tokio::test]
async fn duplicate_settlement_is_recorded_once() {
    let db = TempDb::create("duplicate");
    let backend = Arc::new(ScriptedBackend::new());
    let ledger = Arc::new(db.ledger());
    let engine = engine("dup", dec!(100), backend.clone(), ledger.clone());

    let trade = engine.submit(over_five(dec!(1))).await.unwrap();
    backend.settle(&trade.contract_id, dec!(0.95));
    backend.settle(&trade.contract_id, dec!(0.95));
    engine.wait_idle().await;

    assert_eq!(engine.controller().snapshot().session_profit, dec!(0.95));
    let aggregate = ledger.aggregate("dup").await.unwrap().unwrap();
    assert_eq!(aggregate.runs, 1);
    assert_eq!(aggregate.profit, dec!(0.95));
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_monitoring_resubscribes_and_settles_once() {
    let (transport, venue) = ScriptedTransport::new();
    venue.set_responder(trading_venue);
    let (connection, _driver) = ConnectionManager::spawn(
        transport,
        ConnectionOptions {
            connection: testkit::config::connection(64),
            reconnection: testkit::config::reconnection(5),
            token: Some(ApiToken::new("token")),
        },
    );
    connection.connect().await.unwrap();

    let db = TempDb::create("scenario-d");
    let ledger = Arc::new(db.ledger());
    let engine = engine(
        "live",
        dec!(100),
        Arc::new(VenueBackend::new(connection.clone(), "USD")),
        ledger.clone(),
    );

    let trade = engine.submit(over_five(dec!(1))).await.unwrap();
    assert!(trade.is_pending());
    let spec = SubscriptionSpec::contract(ContractId::from(CONTRACT));
    let first = venue.last_subscription(&spec).unwrap();

    assert!(venue.drop_link("network unreachable"));
    let wanted = Outbound::Subscribe(spec.clone());
    venue
        .wait_for_sent(|sent| sent.iter().filter(|e| e.body == wanted).count() == 2)
        .await;
    let second = venue.last_subscription(&spec).unwrap();
    assert_ne!(first, second);

    let in_flight = engine.in_flight().unwrap();
    assert_eq!(in_flight.contract_id, trade.contract_id);
    assert_eq!(in_flight.result, TradeResult::Pending);

    for _ in 0..2 {
        venue.push(stream_message(
            second,
            &format!("poc-{second}"),
            InboundBody::Contract(closing_update()),
        ));
    }
    engine.wait_idle().await;

    let risk = engine.controller().snapshot();
    assert_eq!(risk.total_wins, 1);
    assert_eq!(risk.session_profit, dec!(0.95));
    let history = ledger.history(&HistoryQuery::recent(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].contract_id.as_str(), CONTRACT);

    let forget = Outbound::Forget {
        subscription_id: format!("poc-{second}"),
    };
    venue.wait_for_sent(|sent| sent.iter().any(|e| e.body == forget)).await;
}

#[tokio::test]
async fn rejected_proposal_over_the_wire_risks_nothing() {
    let (transport, venue) = ScriptedTransport::new();
    venue.set_responder(|envelope| match envelope.body {
        Outbound::Proposal { .. } => vec![reply(
            envelope.req_id,
            InboundBody::Error(stakerunner::port::VenueError {
                code: "MarketIsClosed".into(),
                message: "This market is presently closed.".into(),
                msg_type: "proposal".into(),
            }),
        )],
        _ => Vec::new(),
    });
    let (connection, _driver) = ConnectionManager::spawn(
        transport,
        ConnectionOptions {
            connection: testkit::config::connection(64),
            reconnection: testkit::config::reconnection(5),
            token: None,
        },
    );
    connection.connect().await.unwrap();

    let db = TempDb::create("rejected");
    let engine = engine(
        "live",
        dec!(100),
        Arc::new(VenueBackend::new(connection.clone(), "USD")),
        Arc::new(db.ledger()),
    );

    let err = engine.submit(over_five(dec!(1))).await.unwrap_err();
    assert!(matches!(err, TradeError::ProposalRejected(ref m) if m.contains("MarketIsClosed")));
    assert!(engine.slot().is_idle());
    assert!(!venue.sent_labels().contains(&"buy"));
}

#[tokio::test(start_paused = true)]
async fn unanswered_buy_across_a_slow_reconnect_is_found_and_monitored() {
    let (transport, venue) = ScriptedTransport::new();
    venue.set_responder(|envelope| match &envelope.body {
        Outbound::Buy { .. } => Vec::new(),
        Outbound::Portfolio => vec![reply(
            envelope.req_id,
            InboundBody::Portfolio(vec![OpenContract {
                contract_id: ContractId::from(CONTRACT),
                symbol: "R_100".into(),
                contract_type: "DIGITOVER".into(),
                buy_price: dec!(1),
                payout: dec!(1.95),
                purchased_at: Utc::now(),
            }]),
        )],
        _ => trading_venue(envelope),
    });
    let (connection, _driver) = ConnectionManager::spawn(
        transport,
        ConnectionOptions {
            connection: testkit::config::connection(64),
            reconnection: ReconnectionConfig::default(),
            token: None,
        },
    );
    connection.connect().await.unwrap();

    let db = TempDb::create("unanswered-buy");
    let ledger = Arc::new(db.ledger());
    let engine = engine(
        "live",
        dec!(100),
        Arc::new(VenueBackend::new(connection.clone(), "USD")),
        ledger.clone(),
    );

    let submit = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.submit(over_five(dec!(1))).await }
    });
    venue
        .wait_for_sent(|sent| sent.iter().any(|e| matches!(e.body, Outbound::Buy { .. })))
        .await;
    venue.fail_next_connects(4);
    assert!(venue.drop_link("network unreachable"));

    let trade = submit.await.unwrap().unwrap();
    assert_eq!(trade.contract_id.as_str(), CONTRACT);
    assert!(trade.is_pending());
    assert!(venue.connects() >= 6);

    let labels = venue.sent_labels();
    assert_eq!(labels.iter().filter(|l| **l == "buy").count(), 1);
    assert!(labels.contains(&"portfolio"));
    assert_eq!(
        engine.in_flight().map(|t| t.contract_id),
        Some(ContractId::from(CONTRACT))
    );

    let spec = SubscriptionSpec::contract(ContractId::from(CONTRACT));
    let req_id = venue.last_subscription(&spec).unwrap();
    venue.push(stream_message(
        req_id,
        &format!("poc-{req_id}"),
        InboundBody::Contract(closing_update()),
    ));
    engine.wait_idle().await;
    let history = ledger.history(&HistoryQuery::recent(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].contract_id.as_str(), CONTRACT);
}
