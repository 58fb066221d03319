//! Connection driver task.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::handle::{Command, ConnectionHandle};
use super::{Backoff, ConnectionEvent, ConnectionSnapshot, ConnectionState};
use crate::application::subscription::{SubscriptionRegistry, UpdateSender};
use crate::domain::{ReqId, StreamUpdate, SubscriptionId, SubscriptionSpec};
use crate::error::TransportError;
use crate::infrastructure::config::connection::{ConnectionConfig, ReconnectionConfig};
use crate::port::{ApiToken, Envelope, Inbound, InboundBody, Outbound, Transport, TransportFrame};

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

type RequestReply = oneshot::Sender<Result<Inbound, TransportError>>;

/// Everything the driver needs besides the transport.
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptions {
    pub connection: ConnectionConfig,
    pub reconnection: ReconnectionConfig,
    /// Sent as `authorize` after every socket connect when present.
    pub token: Option<ApiToken>,
}

/// A message waiting for the link.
#[derive(Debug)]
struct Queued {
    body: Outbound,
    reply: Option<RequestReply>,
}

/// What woke the driver.
enum Step {
    Command(Option<Command>),
    Frame(TransportFrame),
    Ping,
    HeartbeatExpired,
    Reconnect,
}

/// Owns the venue connection. Run with [`spawn`](Self::spawn).
pub struct ConnectionManager<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    backoff: Backoff,
    token: Option<ApiToken>,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    registry: SubscriptionRegistry,
    queue: VecDeque<Queued>,
    pending: HashMap<ReqId, RequestReply>,
    connect_waiters: Vec<oneshot::Sender<Result<(), TransportError>>>,
    next_req: u64,
    ping: Interval,
    last_inbound: Instant,
    last_inbound_at: Option<DateTime<Utc>>,
    reconnect_at: Option<Instant>,
    /// Set when a write failed; handled at the top of the loop.
    broken: Option<String>,
    has_opened: bool,
    fatal: Option<TransportError>,
}

impl<T: Transport + 'static> ConnectionManager<T> {
    pub fn new(transport: T, options: ConnectionOptions) -> (Self, ConnectionHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut ping = time::interval(options.connection.heartbeat_interval());
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = ConnectionHandle::new(tx, state_rx, events.clone());
        let manager = Self {
            transport,
            config: options.connection,
            backoff: Backoff::new(options.reconnection),
            token: options.token,
            commands,
            state_tx,
            events,
            registry: SubscriptionRegistry::new(),
            queue: VecDeque::new(),
            pending: HashMap::new(),
            connect_waiters: Vec::new(),
            next_req: 0,
            ping,
            last_inbound: Instant::now(),
            last_inbound_at: None,
            reconnect_at: None,
            broken: None,
            has_opened: false,
            fatal: None,
        };
        (manager, handle)
    }

    /// Build and start the driver task.
    pub fn spawn(transport: T, options: ConnectionOptions) -> (ConnectionHandle, JoinHandle<()>) {
        let (manager, handle) = Self::new(transport, options);
        let task = tokio::spawn(manager.run());
        (handle, task)
    }

    /// Drive the connection until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        info!(venue = self.transport.venue_name(), "Connection driver started");
        loop {
            if let Some(reason) = self.broken.take() {
                self.link_lost(&reason).await;
            }

            let state = self.state();
            let open = state == ConnectionState::Open;
            let heartbeat_deadline = self.last_inbound + self.config.heartbeat_timeout();
            let reconnect_at = self.reconnect_at;
            let reconnect_due = state == ConnectionState::Reconnecting && reconnect_at.is_some();

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                frame = self.transport.next_frame(), if open => Step::Frame(frame),
                _ = self.ping.tick(), if open => Step::Ping,
                () = time::sleep_until(heartbeat_deadline), if open => Step::HeartbeatExpired,
                () = time::sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_due => Step::Reconnect,
            };

            match step {
                Step::Command(None) => {
                    debug!("All connection handles dropped");
                    self.shutdown().await;
                    break;
                }
                Step::Command(Some(Command::Shutdown(done))) => {
                    self.shutdown().await;
                    let _ = done.send(());
                    break;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Frame(TransportFrame::Message(message)) => self.route(message).await,
                Step::Frame(TransportFrame::Closed { reason }) => self.link_lost(&reason).await,
                Step::Ping => self.heartbeat().await,
                Step::HeartbeatExpired => {
                    warn!(
                        timeout_ms = self.config.heartbeat_timeout_ms,
                        "No inbound traffic within heartbeat timeout, forcing reconnect"
                    );
                    self.link_lost("heartbeat timeout").await;
                }
                Step::Reconnect => {
                    self.reconnect_at = None;
                    self.attempt_connect().await;
                }
            }
        }
        info!("Connection driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => self.connect(reply).await,
            Command::Send { body, reply } => {
                let _ = reply.send(self.send(body).await);
            }
            Command::Request { body, reply } => self.request(body, reply).await,
            Command::Subscribe {
                spec,
                handler,
                reply,
            } => {
                let _ = reply.send(self.subscribe(spec, handler).await);
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(self.unsubscribe(id).await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown(_) => {}
        }
    }

    async fn connect(&mut self, reply: oneshot::Sender<Result<(), TransportError>>) {
        match self.state() {
            ConnectionState::Open => {
                let _ = reply.send(Ok(()));
            }
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                self.connect_waiters.push(reply);
            }
            ConnectionState::Closed => {
                let _ = reply.send(Err(self.fatal.clone().unwrap_or(TransportError::Closed)));
            }
            ConnectionState::Idle => {
                self.connect_waiters.push(reply);
                self.set_state(ConnectionState::Connecting);
                self.attempt_connect().await;
            }
        }
    }

    async fn send(&mut self, body: Outbound) -> Result<(), TransportError> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        if self.state() == ConnectionState::Open && self.broken.is_none() {
            let req_id = self.next_req_id();
            if self.transmit(Envelope { req_id, body: body.clone() }).await {
                return Ok(());
            }
        }
        self.enqueue(Queued { body, reply: None })
    }

    async fn request(&mut self, body: Outbound, reply: RequestReply) {
        if self.state() == ConnectionState::Closed {
            let _ = reply.send(Err(TransportError::Closed));
            return;
        }
        if self.state() == ConnectionState::Open && self.broken.is_none() {
            let req_id = self.next_req_id();
            if self.transmit(Envelope { req_id, body: body.clone() }).await {
                self.pending.insert(req_id, reply);
                return;
            }
        }
        let queued = Queued {
            body,
            reply: Some(reply),
        };
        if self.queue.len() >= self.config.outbound_queue_capacity {
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(TransportError::QueueFull {
                    capacity: self.config.outbound_queue_capacity,
                }));
            }
            return;
        }
        self.queue.push_back(queued);
    }

    fn enqueue(&mut self, queued: Queued) -> Result<(), TransportError> {
        let capacity = self.config.outbound_queue_capacity;
        if self.queue.len() >= capacity {
            warn!(capacity, kind = queued.body.label(), "Outbound queue full");
            return Err(TransportError::QueueFull { capacity });
        }
        trace!(kind = queued.body.label(), queued = self.queue.len() + 1, "Queued outbound message");
        self.queue.push_back(queued);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        spec: SubscriptionSpec,
        handler: UpdateSender,
    ) -> Result<SubscriptionId, TransportError> {
        if self.state() == ConnectionState::Closed {
            return Err(TransportError::Closed);
        }
        let id = self.registry.register(spec.clone(), handler);
        debug!(subscription = %id, %spec, "Registered subscription");
        if self.state() == ConnectionState::Open && self.broken.is_none() {
            self.issue(id, spec).await;
        }
        Ok(id)
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(removed) = self.registry.remove(id) else {
            return false;
        };
        debug!(subscription = %id, spec = %removed.spec, "Removed subscription");
        if let Some(venue_id) = removed.venue_id {
            self.forget(venue_id).await;
        }
        true
    }

    async fn issue(&mut self, id: SubscriptionId, spec: SubscriptionSpec) {
        let req_id = self.next_req_id();
        self.registry.bind(id, req_id);
        let _ = self
            .transmit(Envelope {
                req_id,
                body: Outbound::Subscribe(spec),
            })
            .await;
    }

    async fn forget(&mut self, subscription_id: String) {
        if self.state() != ConnectionState::Open || self.broken.is_some() {
            return;
        }
        let req_id = self.next_req_id();
        let _ = self
            .transmit(Envelope {
                req_id,
                body: Outbound::Forget { subscription_id },
            })
            .await;
    }

    /// Write one envelope. A failed write marks the link broken.
    async fn transmit(&mut self, envelope: Envelope) -> bool {
        match self.transport.send(&envelope).await {
            Ok(()) => {
                trace!(req_id = %envelope.req_id, kind = envelope.body.label(), "Sent");
                true
            }
            Err(e) => {
                warn!(error = %e, kind = envelope.body.label(), "Send failed");
                self.broken = Some(e.to_string());
                false
            }
        }
    }

    async fn attempt_connect(&mut self) {
        match self.establish().await {
            Ok(()) => self.opened().await,
            Err(e) if e.is_fatal() => self.close_terminal(e).await,
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                self.schedule_reconnect(&e.to_string()).await;
            }
        }
    }

    /// Socket connect plus authorization, bounded by the connect timeout.
    async fn establish(&mut self) -> Result<(), TransportError> {
        let budget = self.config.connect_timeout();
        match time::timeout(budget, self.open_and_authorize()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.transport.close().await;
                Err(e)
            }
            Err(_) => {
                self.transport.close().await;
                Err(TransportError::Timeout("connect"))
            }
        }
    }

    async fn open_and_authorize(&mut self) -> Result<(), TransportError> {
        self.transport
            .connect()
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        let Some(token) = self.token.clone() else {
            return Ok(());
        };

        let req_id = self.next_req_id();
        let envelope = Envelope {
            req_id,
            body: Outbound::Authorize { token },
        };
        self.transport
            .send(&envelope)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;

        loop {
            match self.transport.next_frame().await {
                TransportFrame::Message(message) if message.req_id == Some(req_id) => {
                    return match message.body {
                        InboundBody::Error(err) => {
                            Err(TransportError::AuthFailed(format!("{}: {}", err.code, err.message)))
                        }
                        InboundBody::Authorized { login_id } => {
                            info!(account = %login_id, "Authorized");
                            Ok(())
                        }
                        other => Err(TransportError::Socket(format!(
                            "unexpected authorize reply: {other:?}"
                        ))),
                    };
                }
                TransportFrame::Message(message) => {
                    trace!(?message, "Ignoring message before authorization");
                }
                TransportFrame::Closed { reason } => return Err(TransportError::Socket(reason)),
            }
        }
    }

    async fn opened(&mut self) {
        let attempts = self.backoff.attempt();
        let reconnected = self.has_opened;
        self.has_opened = true;
        self.backoff.reset();
        self.reconnect_at = None;
        self.broken = None;
        self.mark_inbound();
        self.ping.reset();
        self.set_state(ConnectionState::Open);
        info!(
            venue = self.transport.venue_name(),
            attempts,
            subscriptions = self.registry.len(),
            queued = self.queue.len(),
            "Connection open"
        );

        for (id, spec) in self.registry.unbound() {
            debug!(subscription = %id, %spec, "Issuing subscription");
            self.issue(id, spec).await;
        }
        self.flush().await;

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if reconnected {
            let _ = self.events.send(ConnectionEvent::Reconnected { attempts });
        }
    }

    /// Transmit queued messages in order until the queue is empty or a write
    /// fails.
    async fn flush(&mut self) {
        while self.broken.is_none() {
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            if queued.reply.as_ref().is_some_and(oneshot::Sender::is_closed) {
                continue;
            }
            let req_id = self.next_req_id();
            let envelope = Envelope {
                req_id,
                body: queued.body.clone(),
            };
            if self.transmit(envelope).await {
                if let Some(reply) = queued.reply {
                    self.pending.insert(req_id, reply);
                }
            } else {
                self.queue.push_front(queued);
            }
        }
    }

    async fn link_lost(&mut self, reason: &str) {
        if self.state() != ConnectionState::Open {
            return;
        }
        warn!(reason, pending = self.pending.len(), "Connection lost");
        self.transport.close().await;
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(TransportError::Disconnected));
        }
        self.registry.clear_bindings();
        self.schedule_reconnect(reason).await;
    }

    async fn schedule_reconnect(&mut self, reason: &str) {
        let Some(delay) = self.backoff.next_delay() else {
            let attempts = self.backoff.attempt();
            self.close_terminal(TransportError::RetriesExhausted { attempts })
                .await;
            return;
        };
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Reconnecting);
        info!(
            attempt = self.backoff.attempt(),
            max_attempts = self.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            reason,
            "Reconnecting after delay"
        );
    }

    async fn close_terminal(&mut self, err: TransportError) {
        error!(error = %err, "Connection closed permanently");
        self.transport.close().await;
        self.fatal = Some(err.clone());
        self.reconnect_at = None;
        self.fail_outstanding(&err);
        self.set_state(ConnectionState::Closed);
        let _ = self.events.send(ConnectionEvent::Fatal(err));
    }

    async fn shutdown(&mut self) {
        self.transport.close().await;
        self.fail_outstanding(&TransportError::Closed);
        if self.state() != ConnectionState::Closed {
            self.set_state(ConnectionState::Closed);
        }
    }

    fn fail_outstanding(&mut self, err: &TransportError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(err.clone()));
        }
        for queued in self.queue.drain(..) {
            if let Some(reply) = queued.reply {
                let _ = reply.send(Err(err.clone()));
            }
        }
    }

    async fn heartbeat(&mut self) {
        self.pending.retain(|_, reply| !reply.is_closed());
        for (id, removed) in self.registry.prune_closed() {
            debug!(subscription = %id, spec = %removed.spec, "Handler dropped, forgetting stream");
            if let Some(venue_id) = removed.venue_id {
                self.forget(venue_id).await;
            }
        }
        let req_id = self.next_req_id();
        let _ = self
            .transmit(Envelope {
                req_id,
                body: Outbound::Ping,
            })
            .await;
    }

    /// Dispatch one inbound message: waiting request first, then
    /// subscription, then the generic error channel.
    async fn route(&mut self, message: Inbound) {
        self.mark_inbound();

        if let Some(req_id) = message.req_id {
            if let Some(reply) = self.pending.remove(&req_id) {
                let _ = reply.send(Ok(message));
                return;
            }
            if let Some(id) = self.registry.resolve(req_id) {
                self.deliver(id, message).await;
                return;
            }
            let orphaned = match (&message.subscription_id, &message.body) {
                (Some(_), _) | (None, InboundBody::Error(_)) => self.registry.take_orphan(req_id),
                _ => false,
            };
            if orphaned {
                match message.subscription_id {
                    Some(venue_id) => {
                        debug!(%req_id, "Stream named after unsubscribe, forgetting");
                        self.forget(venue_id).await;
                    }
                    None => debug!(%req_id, "Venue refused a stream already unsubscribed"),
                }
                return;
            }
        }

        match message.body {
            InboundBody::Error(err) => {
                warn!(code = %err.code, message = %err.message, msg_type = %err.msg_type, "Unmatched venue error");
                let _ = self.events.send(ConnectionEvent::VenueError(err));
            }
            InboundBody::Pong | InboundBody::Forgotten | InboundBody::Authorized { .. } => {
                trace!("Acknowledgement");
            }
            other => debug!(?other, "Unrouted message"),
        }
    }

    async fn deliver(&mut self, id: SubscriptionId, message: Inbound) {
        if let Some(venue_id) = message.subscription_id.as_deref() {
            self.registry.set_venue_id(id, venue_id);
        }
        let update = match message.body {
            InboundBody::Tick(tick) => StreamUpdate::Tick(tick),
            InboundBody::Contract(contract) => StreamUpdate::Contract(contract),
            InboundBody::Balance(balance) => StreamUpdate::Balance(balance),
            InboundBody::Error(err) => {
                warn!(subscription = %id, code = %err.code, message = %err.message, "Subscription rejected");
                self.registry.notify(
                    id,
                    StreamUpdate::Error {
                        code: err.code,
                        message: err.message,
                    },
                );
                self.registry.discard(id);
                return;
            }
            other => {
                trace!(subscription = %id, ?other, "Ignoring non-stream reply");
                return;
            }
        };
        if !self.registry.notify(id, update) {
            debug!(subscription = %id, "Handler gone, unsubscribing");
            self.unsubscribe(id).await;
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state: self.state(),
            reconnect_attempts: self.backoff.attempt(),
            queued: self.queue.len(),
            pending_requests: self.pending.len(),
            subscriptions: self.registry.active_specs(),
            last_inbound_at: self.last_inbound_at,
        }
    }

    fn mark_inbound(&mut self) {
        self.last_inbound = Instant::now();
        self.last_inbound_at = Some(Utc::now());
    }

    fn next_req_id(&mut self) -> ReqId {
        self.next_req += 1;
        ReqId::new(self.next_req)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
            let _ = self.events.send(ConnectionEvent::StateChanged(state));
        }
    }
}
