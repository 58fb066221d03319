use std::collections::BTreeSet;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use super::*;
use crate::domain::{ReqId, StreamUpdate, SubscriptionSpec};
use crate::port::{ApiToken, Inbound, InboundBody, Outbound, VenueError};
use crate::testkit;
use crate::testkit::transport::{reply, stream_message, ScriptedTransport, VenueControl};

fn options(queue: usize, max_attempts: u32, token: Option<&str>) -> ConnectionOptions {
    ConnectionOptions {
        connection: testkit::config::connection(queue),
        reconnection: testkit::config::reconnection(max_attempts),
        token: token.map(ApiToken::new),
    }
}

fn start(options: ConnectionOptions) -> (ConnectionHandle, VenueControl) {
    let (transport, venue) = ScriptedTransport::new();
    let (handle, _task) = ConnectionManager::spawn(transport, options);
    (handle, venue)
}

fn subscribed(venue: &VenueControl, since: usize) -> BTreeSet<SubscriptionSpec> {
    venue
        .subscriptions_sent()
        .into_iter()
        .skip(since)
        .map(|(_, spec)| spec)
        .collect()
}

async fn next_matching(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    pred: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        let event = events.recv().await.unwrap();
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn authorize_precedes_open() {
    let (handle, venue) = start(options(8, 3, Some("secret")));
    handle.connect().await.unwrap();

    assert_eq!(handle.state(), ConnectionState::Open);
    let sent = venue.sent();
    assert_eq!(sent[0].req_id, ReqId::new(1));
    assert!(matches!(&sent[0].body, Outbound::Authorize { token } if token.expose() == "secret"));
}

#[tokio::test]
async fn rejected_token_closes_without_retry() {
    let (handle, venue) = start(options(8, 5, Some("stale")));
    venue.reject_authorization("InvalidToken", "The token is invalid.");

    let err = handle.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::AuthFailed(_)));
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert_eq!(venue.connects(), 1);

    let again = handle.request(Outbound::Portfolio).await.unwrap_err();
    assert_eq!(again, TransportError::Closed);
}

#[tokio::test]
async fn request_gets_correlated_reply() {
    let (handle, venue) = start(options(8, 3, None));
    venue.set_responder(|envelope| match envelope.body {
        Outbound::Portfolio => vec![
            reply(ReqId::new(999), InboundBody::Portfolio(Vec::new())),
            reply(envelope.req_id, InboundBody::Portfolio(Vec::new())),
        ],
        _ => Vec::new(),
    });
    handle.connect().await.unwrap();

    let answer = handle.request(Outbound::Portfolio).await.unwrap();
    assert_eq!(answer.req_id, Some(ReqId::new(1)));
    assert_eq!(answer.body, InboundBody::Portfolio(Vec::new()));
}

#[tokio::test]
async fn venue_error_reply_is_returned_to_requester() {
    let (handle, venue) = start(options(8, 3, None));
    venue.set_responder(|envelope| {
        vec![reply(
            envelope.req_id,
            InboundBody::Error(VenueError {
                code: "InvalidContractProposal".into(),
                message: "Barrier is out of range.".into(),
                msg_type: "proposal".into(),
            }),
        )]
    });
    handle.connect().await.unwrap();

    let answer = handle.request(Outbound::Portfolio).await.unwrap();
    assert!(answer.is_error());
}

#[tokio::test]
async fn queued_messages_flush_in_order_on_open() {
    let (handle, venue) = start(options(8, 3, None));
    handle.send(Outbound::Portfolio).await.unwrap();
    handle
        .send(Outbound::Buy {
            proposal_id: "p-1".into(),
            price: dec!(1),
        })
        .await
        .unwrap();
    assert_eq!(handle.snapshot().await.unwrap().queued, 2);
    assert!(venue.sent().is_empty());

    handle.connect().await.unwrap();
    assert_eq!(venue.sent_labels(), vec!["portfolio", "buy"]);
    assert_eq!(handle.snapshot().await.unwrap().queued, 0);
}

#[tokio::test]
async fn full_queue_rejects_without_dropping() {
    let (handle, venue) = start(options(2, 3, None));
    handle.send(Outbound::Portfolio).await.unwrap();
    handle.send(Outbound::Ping).await.unwrap();

    let err = handle.send(Outbound::Portfolio).await.unwrap_err();
    assert_eq!(err, TransportError::QueueFull { capacity: 2 });

    handle.connect().await.unwrap();
    assert_eq!(venue.sent_labels(), vec!["portfolio", "ping"]);
}

#[tokio::test]
async fn stream_messages_reach_their_subscription() {
    let (handle, venue) = start(options(8, 3, None));
    handle.connect().await.unwrap();
    let spec = SubscriptionSpec::ticks("R_100");
    let (id, mut updates) = handle.subscribe_channel(spec.clone()).await.unwrap();

    let req_id = venue.last_subscription(&spec).unwrap();
    venue.push(stream_message(
        req_id,
        "stream-abc",
        InboundBody::Tick(testkit::domain::tick("R_100", "100.25", 10)),
    ));
    match updates.recv().await.unwrap() {
        StreamUpdate::Tick(tick) => assert_eq!(tick.quote, "100.25"),
        other => panic!("unexpected update {other:?}"),
    }

    assert!(handle.unsubscribe(id).await);
    let last = venue.sent().pop().unwrap();
    assert_eq!(
        last.body,
        Outbound::Forget {
            subscription_id: "stream-abc".into()
        }
    );
    assert!(!handle.unsubscribe(id).await);
}

#[tokio::test]
async fn rejected_subscription_is_removed() {
    let (handle, venue) = start(options(8, 3, None));
    handle.connect().await.unwrap();
    let spec = SubscriptionSpec::ticks("NOPE");
    let (_, mut updates) = handle.subscribe_channel(spec.clone()).await.unwrap();

    let req_id = venue.last_subscription(&spec).unwrap();
    venue.push(reply(
        req_id,
        InboundBody::Error(VenueError {
            code: "MarketIsClosed".into(),
            message: "This market is presently closed.".into(),
            msg_type: "ticks".into(),
        }),
    ));

    assert!(matches!(
        updates.recv().await,
        Some(StreamUpdate::Error { code, .. }) if code == "MarketIsClosed"
    ));
    assert!(handle.snapshot().await.unwrap().subscriptions.is_empty());
}

#[tokio::test]
async fn refusal_of_an_unsubscribed_stream_is_settled_quietly() {
    let (handle, venue) = start(options(8, 3, None));
    let mut events = handle.events();
    handle.connect().await.unwrap();
    let spec = SubscriptionSpec::ticks("NOPE");
    let (id, _updates) = handle.subscribe_channel(spec.clone()).await.unwrap();
    let req_id = venue.last_subscription(&spec).unwrap();
    assert!(handle.unsubscribe(id).await);

    let refusal = |code: &str, req_id| {
        reply(
            req_id,
            InboundBody::Error(VenueError {
                code: code.into(),
                message: "refused".into(),
                msg_type: "ticks".into(),
            }),
        )
    };
    venue.push(refusal("MarketIsClosed", req_id));
    venue.push(stream_message(
        req_id,
        "late-stream",
        InboundBody::Tick(testkit::domain::tick("NOPE", "1.00", 1)),
    ));
    venue.push(refusal("RateLimit", ReqId::new(4242)));

    let event = next_matching(&mut events, |e| matches!(e, ConnectionEvent::VenueError(_))).await;
    assert!(matches!(event, ConnectionEvent::VenueError(err) if err.code == "RateLimit"));
    assert!(!venue.sent_labels().contains(&"forget"));
}

#[tokio::test]
async fn unmatched_error_is_published() {
    let (handle, venue) = start(options(8, 3, None));
    let mut events = handle.events();
    handle.connect().await.unwrap();

    venue.push(Inbound {
        req_id: Some(ReqId::new(4242)),
        subscription_id: None,
        body: InboundBody::Error(VenueError {
            code: "RateLimit".into(),
            message: "You have reached the rate limit.".into(),
            msg_type: "ticks".into(),
        }),
    });

    let event = next_matching(&mut events, |e| matches!(e, ConnectionEvent::VenueError(_))).await;
    assert!(matches!(event, ConnectionEvent::VenueError(err) if err.code == "RateLimit"));
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_every_subscription() {
    let (handle, venue) = start(options(8, 5, Some("secret")));
    let mut events = handle.events();
    handle.connect().await.unwrap();

    let (_, _ticks) = handle
        .subscribe_channel(SubscriptionSpec::ticks("R_100"))
        .await
        .unwrap();
    let (_, _balance) = handle
        .subscribe_channel(SubscriptionSpec::balance())
        .await
        .unwrap();
    let before = subscribed(&venue, 0);
    let issued = venue.subscriptions_sent().len();

    assert!(venue.drop_link("server restart"));
    venue.wait_for_connects(2).await;
    venue
        .wait_for_sent(|sent| {
            sent.iter()
                .filter(|e| matches!(e.body, Outbound::Subscribe(_)))
                .count()
                >= issued * 2
        })
        .await;

    assert_eq!(subscribed(&venue, issued), before);
    let event = next_matching(&mut events, |e| matches!(e, ConnectionEvent::Reconnected { .. })).await;
    assert_eq!(event, ConnectionEvent::Reconnected { attempts: 1 });
    assert_eq!(handle.state(), ConnectionState::Open);

    let authorizations = venue.sent_labels().iter().filter(|l| **l == "authorize").count();
    assert_eq!(authorizations, 2);
}

#[tokio::test(start_paused = true)]
async fn in_flight_request_fails_on_drop() {
    let (handle, venue) = start(options(8, 5, None));
    handle.connect().await.unwrap();

    let pending = tokio::spawn({
        let handle = handle.clone();
        async move { handle.request(Outbound::Portfolio).await }
    });
    venue
        .wait_for_sent(|sent| sent.iter().any(|e| e.body == Outbound::Portfolio))
        .await;
    venue.drop_link("reset by peer");

    assert_eq!(pending.await.unwrap().unwrap_err(), TransportError::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn silent_link_is_replaced() {
    let (handle, venue) = start(options(8, 5, None));
    let mut events = handle.events();
    handle.connect().await.unwrap();
    venue.answer_pings(false);

    venue.wait_for_connects(2).await;
    next_matching(&mut events, |e| {
        *e == ConnectionEvent::StateChanged(ConnectionState::Reconnecting)
    })
    .await;
    assert!(venue.sent_labels().contains(&"ping"));
}

#[tokio::test(start_paused = true)]
async fn answered_pings_keep_the_link() {
    let (handle, venue) = start(options(8, 5, None));
    handle.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(venue.connects(), 1);
    assert_eq!(handle.state(), ConnectionState::Open);
    assert!(handle.snapshot().await.unwrap().last_inbound_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_close_for_good() {
    let (handle, venue) = start(options(8, 2, None));
    venue.fail_next_connects(10);

    let err = handle.connect().await.unwrap_err();
    assert_eq!(err, TransportError::RetriesExhausted { attempts: 2 });
    assert_eq!(handle.state(), ConnectionState::Closed);
    assert_eq!(venue.connects(), 3);
}

#[tokio::test(start_paused = true)]
async fn connect_retries_until_the_venue_answers() {
    let (handle, venue) = start(options(8, 5, None));
    venue.fail_next_connects(2);

    handle.connect().await.unwrap();
    assert_eq!(venue.connects(), 3);
    assert_eq!(handle.snapshot().await.unwrap().reconnect_attempts, 0);
}

#[tokio::test]
async fn shutdown_closes_link() {
    let (handle, venue) = start(options(8, 3, None));
    handle.connect().await.unwrap();
    handle.shutdown().await;

    assert_eq!(handle.state(), ConnectionState::Closed);
    assert!(!venue.is_connected());
    assert_eq!(handle.send(Outbound::Ping).await.unwrap_err(), TransportError::Closed);
}
