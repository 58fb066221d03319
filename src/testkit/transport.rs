//! Scripted venue transport for connection tests.
//!
//! [`ScriptedTransport`] is handed to the connection manager; the paired
//! [`VenueControl`] stays with the test and plays the venue: it sees every
//! envelope sent, pushes inbound messages on the current link, drops the
//! link, and makes connects fail.
//!
//! By default the venue answers `ping` with a pong and `authorize` with an
//! acknowledgement. Anything else is answered by an optional responder.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::domain::{ReqId, SubscriptionSpec};
use crate::error::{Error, Result};
use crate::port::{Envelope, Inbound, InboundBody, Outbound, Transport, TransportFrame, VenueError};

/// Produces the venue's replies to one outbound envelope.
pub type Responder = Box<dyn Fn(&Envelope) -> Vec<Inbound> + Send + Sync>;

struct Shared {
    sent: Vec<Envelope>,
    connects: u32,
    fail_connects: u32,
    answer_pings: bool,
    authorize_error: Option<VenueError>,
    responder: Option<Responder>,
    /// Inbound side of the current link.
    link: Option<mpsc::UnboundedSender<TransportFrame>>,
}

impl Shared {
    fn replies(&self, envelope: &Envelope) -> Vec<Inbound> {
        match &envelope.body {
            Outbound::Ping if self.answer_pings => vec![reply(envelope.req_id, InboundBody::Pong)],
            Outbound::Ping => Vec::new(),
            Outbound::Authorize { .. } => {
                let body = self.authorize_error.clone().map_or_else(
                    || InboundBody::Authorized {
                        login_id: "CR000001".into(),
                    },
                    InboundBody::Error,
                );
                vec![reply(envelope.req_id, body)]
            }
            _ => self.responder.as_ref().map(|f| f(envelope)).unwrap_or_default(),
        }
    }
}

/// Build a reply correlated to `req_id`.
#[must_use]
pub fn reply(req_id: ReqId, body: InboundBody) -> Inbound {
    Inbound {
        req_id: Some(req_id),
        subscription_id: None,
        body,
    }
}

/// Build a stream message for a subscription issued as `req_id`.
#[must_use]
pub fn stream_message(req_id: ReqId, subscription_id: &str, body: InboundBody) -> Inbound {
    Inbound {
        req_id: Some(req_id),
        subscription_id: Some(subscription_id.to_string()),
        body,
    }
}

/// In-process [`Transport`] driven by a [`VenueControl`].
pub struct ScriptedTransport {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
    rx: Option<mpsc::UnboundedReceiver<TransportFrame>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> (Self, VenueControl) {
        let shared = Arc::new(Mutex::new(Shared {
            sent: Vec::new(),
            connects: 0,
            fail_connects: 0,
            answer_pings: true,
            authorize_error: None,
            responder: None,
            link: None,
        }));
        let notify = Arc::new(Notify::new());
        let control = VenueControl {
            shared: Arc::clone(&shared),
            notify: Arc::clone(&notify),
        };
        (
            Self {
                shared,
                notify,
                rx: None,
            },
            control,
        )
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        let result = {
            let mut shared = self.shared.lock();
            shared.connects += 1;
            if shared.fail_connects > 0 {
                shared.fail_connects -= 1;
                Err(Error::Connection("scripted connect failure".into()))
            } else {
                let (tx, rx) = mpsc::unbounded_channel();
                shared.link = Some(tx);
                self.rx = Some(rx);
                Ok(())
            }
        };
        self.notify.notify_waiters();
        result
    }

    async fn send(&mut self, envelope: &Envelope) -> Result<()> {
        if self.rx.is_none() {
            return Err(Error::Connection("Not connected".into()));
        }
        {
            let mut shared = self.shared.lock();
            shared.sent.push(envelope.clone());
            let replies = shared.replies(envelope);
            if let Some(link) = &shared.link {
                for message in replies {
                    let _ = link.send(TransportFrame::Message(message));
                }
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn next_frame(&mut self) -> TransportFrame {
        let Some(rx) = self.rx.as_mut() else {
            return TransportFrame::Closed {
                reason: "not connected".into(),
            };
        };
        let frame = rx.recv().await.unwrap_or_else(|| TransportFrame::Closed {
            reason: "link dropped".into(),
        });
        if matches!(frame, TransportFrame::Closed { .. }) {
            self.rx = None;
        }
        frame
    }

    async fn close(&mut self) {
        self.rx = None;
        self.shared.lock().link = None;
    }

    fn venue_name(&self) -> &'static str {
        "scripted"
    }
}

/// The test's side of a [`ScriptedTransport`].
#[derive(Clone)]
pub struct VenueControl {
    shared: Arc<Mutex<Shared>>,
    notify: Arc<Notify>,
}

impl VenueControl {
    /// Socket connects attempted so far, failed ones included.
    #[must_use]
    pub fn connects(&self) -> u32 {
        self.shared.lock().connects
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.lock().link.is_some()
    }

    /// Every envelope transmitted, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Envelope> {
        self.shared.lock().sent.clone()
    }

    /// Labels of every transmitted envelope, in order.
    #[must_use]
    pub fn sent_labels(&self) -> Vec<&'static str> {
        self.shared.lock().sent.iter().map(|e| e.body.label()).collect()
    }

    /// Subscribe commands transmitted, in order.
    #[must_use]
    pub fn subscriptions_sent(&self) -> Vec<(ReqId, SubscriptionSpec)> {
        self.shared
            .lock()
            .sent
            .iter()
            .filter_map(|e| match &e.body {
                Outbound::Subscribe(spec) => Some((e.req_id, spec.clone())),
                _ => None,
            })
            .collect()
    }

    /// Correlation id of the latest transmission of `spec`.
    #[must_use]
    pub fn last_subscription(&self, spec: &SubscriptionSpec) -> Option<ReqId> {
        self.subscriptions_sent()
            .into_iter()
            .rev()
            .find(|(_, s)| s == spec)
            .map(|(req_id, _)| req_id)
    }

    /// Deliver a message on the current link. False if no link is up.
    pub fn push(&self, message: Inbound) -> bool {
        self.shared
            .lock()
            .link
            .as_ref()
            .is_some_and(|link| link.send(TransportFrame::Message(message)).is_ok())
    }

    /// Close the current link from the venue side.
    pub fn drop_link(&self, reason: &str) -> bool {
        let link = self.shared.lock().link.take();
        link.is_some_and(|link| {
            link.send(TransportFrame::Closed {
                reason: reason.to_string(),
            })
            .is_ok()
        })
    }

    /// Make the next `n` connects fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.shared.lock().fail_connects = n;
    }

    /// Stop (or resume) answering pings; the link then goes silent.
    pub fn answer_pings(&self, answer: bool) {
        self.shared.lock().answer_pings = answer;
    }

    /// Answer every `authorize` with this error.
    pub fn reject_authorization(&self, code: &str, message: &str) {
        self.shared.lock().authorize_error = Some(VenueError {
            code: code.to_string(),
            message: message.to_string(),
            msg_type: "authorize".into(),
        });
    }

    pub fn set_responder(&self, responder: impl Fn(&Envelope) -> Vec<Inbound> + Send + Sync + 'static) {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    /// Wait until `predicate` holds for the envelopes sent so far.
    pub async fn wait_for_sent(&self, mut predicate: impl FnMut(&[Envelope]) -> bool) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if predicate(&self.shared.lock().sent) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `n` connects have been attempted.
    pub async fn wait_for_connects(&self, n: u32) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.connects() >= n {
                return;
            }
            notified.await;
        }
    }
}
