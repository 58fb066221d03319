//! Connection lifecycle against a scripted venue, on paused time.

use std::collections::BTreeSet;
use std::time::Duration;

use stakerunner::application::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionOptions, ConnectionState,
};
use stakerunner::domain::{ContractId, SubscriptionSpec};
use stakerunner::error::TransportError;
use stakerunner::infrastructure::config::connection::ConnectionConfig;
use stakerunner::port::{ApiToken, Outbound};
use stakerunner::testkit;
use stakerunner::testkit::transport::{ScriptedTransport, VenueControl};

fn spawn(connection: ConnectionConfig, max_attempts: u32) -> (ConnectionHandle, VenueControl) {
    let (transport, venue) = ScriptedTransport::new();
    let (handle, _driver) = ConnectionManager::spawn(
        transport,
        ConnectionOptions {
            connection,
            reconnection: testkit::config::reconnection(max_attempts),
            token: Some(ApiToken::new("token")),
        },
    );
    (handle, venue)
}

fn ten_second_heartbeat() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_interval_ms: 5_000,
        heartbeat_timeout_ms: 10_000,
        outbound_queue_capacity: 64,
        connect_timeout_ms: 2_000,
    }
}

#[tokio::test(start_paused = true)]
async fn eleven_silent_seconds_force_exactly_one_reconnect() {
    let (handle, venue) = spawn(ten_second_heartbeat(), 5);
    handle.connect().await.unwrap();
    venue.answer_pings(false);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(venue.connects(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(venue.connects(), 2);
    assert_eq!(handle.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn replay_after_failed_attempts_matches_original_set() {
    let (handle, venue) = spawn(testkit::config::connection(64), 10);
    let mut events = handle.events();
    handle.connect().await.unwrap();

    let specs = [
        SubscriptionSpec::ticks("R_100"),
        SubscriptionSpec::ticks("R_50"),
        SubscriptionSpec::balance(),
        SubscriptionSpec::contract(ContractId::from("555")),
    ];
    let mut receivers = Vec::new();
    for spec in &specs {
        receivers.push(handle.subscribe_channel(spec.clone()).await.unwrap());
    }
    let issued = venue.subscriptions_sent().len();
    assert_eq!(issued, specs.len());

    venue.fail_next_connects(3);
    venue.drop_link("venue maintenance");
    venue.wait_for_connects(5).await;
    venue
        .wait_for_sent(|sent| {
            sent.iter()
                .filter(|e| matches!(e.body, Outbound::Subscribe(_)))
                .count()
                == issued * 2
        })
        .await;

    let replayed: BTreeSet<_> = venue
        .subscriptions_sent()
        .into_iter()
        .skip(issued)
        .map(|(_, spec)| spec)
        .collect();
    assert_eq!(replayed, specs.into_iter().collect());

    loop {
        if let ConnectionEvent::Reconnected { attempts } = events.recv().await.unwrap() {
            assert_eq!(attempts, 4);
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn fatal_close_is_published_once() {
    let (handle, venue) = spawn(testkit::config::connection(64), 2);
    let mut events = handle.events();
    handle.connect().await.unwrap();

    venue.fail_next_connects(100);
    venue.drop_link("gone");

    let fatal = loop {
        if let ConnectionEvent::Fatal(e) = events.recv().await.unwrap() {
            break e;
        }
    };
    assert_eq!(fatal, TransportError::RetriesExhausted { attempts: 2 });
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert_eq!(
        handle.request(Outbound::Portfolio).await.unwrap_err(),
        TransportError::Closed
    );
}
