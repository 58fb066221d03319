use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::{ConnectionEvent, ConnectionSnapshot, ConnectionState};
use crate::application::subscription::UpdateSender;
use crate::domain::{StreamUpdate, SubscriptionId, SubscriptionSpec};
use crate::error::TransportError;
use crate::port::{Inbound, Outbound};

type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

/// Messages from handles to the driver task.
#[derive(Debug)]
pub(super) enum Command {
    Connect(Reply<()>),
    Send {
        body: Outbound,
        reply: Reply<()>,
    },
    Request {
        body: Outbound,
        reply: Reply<Inbound>,
    },
    Subscribe {
        spec: SubscriptionSpec,
        handler: UpdateSender,
        reply: Reply<SubscriptionId>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot(oneshot::Sender<ConnectionSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable access to the connection.
///
/// Every method fails with [`TransportError::Closed`] once the driver task
/// has exited.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    pub(super) const fn new(
        tx: mpsc::Sender<Command>,
        state: watch::Receiver<ConnectionState>,
        events: broadcast::Sender<ConnectionEvent>,
    ) -> Self {
        Self { tx, state, events }
    }

    /// Open the connection, returning once it is Open.
    ///
    /// A no-op if already Open; joins the attempt in progress if Connecting
    /// or Reconnecting.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if authentication fails or reconnect attempts
    /// are exhausted.
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.call(Command::Connect).await
    }

    /// Transmit now if Open, otherwise queue until the next Open.
    ///
    /// # Errors
    ///
    /// [`TransportError::QueueFull`] if the message had to be queued and the
    /// queue is at capacity.
    pub async fn send(&self, body: Outbound) -> Result<(), TransportError> {
        self.call(|reply| Command::Send { body, reply }).await
    }

    /// Send and wait for the correlated reply.
    ///
    /// Venue error replies are returned as `Ok` with an error body; only the
    /// link itself produces `Err`.
    ///
    /// # Errors
    ///
    /// [`TransportError::Disconnected`] if the request was transmitted and
    /// the link dropped before the reply arrived.
    pub async fn request(&self, body: Outbound) -> Result<Inbound, TransportError> {
        self.call(|reply| Command::Request { body, reply }).await
    }

    /// Register a subscription delivering into `handler`.
    ///
    /// Issued immediately when Open, otherwise on the next Open.
    ///
    /// # Errors
    ///
    /// Fails only when the connection is closed.
    pub async fn subscribe(
        &self,
        spec: SubscriptionSpec,
        handler: UpdateSender,
    ) -> Result<SubscriptionId, TransportError> {
        self.call(|reply| Command::Subscribe {
            spec,
            handler,
            reply,
        })
        .await
    }

    /// [`subscribe`](Self::subscribe) with a fresh channel.
    ///
    /// # Errors
    ///
    /// Fails only when the connection is closed.
    pub async fn subscribe_channel(
        &self,
        spec: SubscriptionSpec,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<StreamUpdate>), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(spec, tx).await?;
        Ok((id, rx))
    }

    /// Remove a subscription and tell the venue to stop the stream.
    ///
    /// Returns false for unknown ids.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Unsubscribe { id, reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// # Errors
    ///
    /// Fails when the driver task has exited.
    pub async fn snapshot(&self) -> Result<ConnectionSnapshot, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot(reply))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)
    }

    /// Close the connection and stop the driver task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Shutdown(reply)).await.is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, TransportError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }
}
