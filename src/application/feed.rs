//! Stream consumers: ticks into the normaliser, balance into engine events.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionEvent, ConnectionHandle};
use super::event::EngineEvent;
use super::market::MarketDataNormalizer;
use crate::domain::{StreamUpdate, SubscriptionSpec, Symbol};
use crate::error::TransportError;

/// Keeps one symbol's tick stream flowing into the normaliser.
pub struct TickFeed {
    connection: ConnectionHandle,
    normalizer: Arc<MarketDataNormalizer>,
    symbol: Symbol,
}

impl TickFeed {
    #[must_use]
    pub fn new(connection: ConnectionHandle, normalizer: Arc<MarketDataNormalizer>, symbol: Symbol) -> Self {
        Self {
            connection,
            normalizer,
            symbol,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let symbol = self.symbol.clone();
            if let Err(e) = self.run().await {
                error!(%symbol, error = %e, "Tick feed stopped");
            }
        })
    }

    /// Consume ticks until the stream or the connection ends.
    ///
    /// Every reconnect starts a new segment in the normaliser so the gap is
    /// never mistaken for contiguous history.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed.
    pub async fn run(self) -> Result<(), TransportError> {
        let mut connection_events = self.connection.events();
        let (subscription, mut updates) = self
            .connection
            .subscribe_channel(SubscriptionSpec::ticks(self.symbol.clone()))
            .await?;
        info!(symbol = %self.symbol, %subscription, "Tick feed started");

        loop {
            tokio::select! {
                biased;

                event = connection_events.recv() => match event {
                    Ok(ConnectionEvent::Reconnected { .. }) => {
                        let segment = self.normalizer.mark_discontinuity();
                        debug!(symbol = %self.symbol, segment, "Tick stream resumed after gap");
                    }
                    Ok(ConnectionEvent::Fatal(e)) => return Err(e),
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return Err(TransportError::Closed),
                },
                update = updates.recv() => match update {
                    Some(StreamUpdate::Tick(tick)) => {
                        if let Err(e) = self.normalizer.on_tick(&tick) {
                            warn!(symbol = %self.symbol, error = %e, "Dropping malformed tick");
                        }
                    }
                    Some(StreamUpdate::Error { code, message }) => {
                        error!(symbol = %self.symbol, %code, %message, "Tick stream rejected");
                        return Ok(());
                    }
                    Some(_) => {}
                    None => return Err(TransportError::Closed),
                },
            }
        }
    }
}

/// Forwards account balance updates as [`EngineEvent::Balance`].
pub struct BalanceFeed {
    connection: ConnectionHandle,
    events: broadcast::Sender<EngineEvent>,
}

impl BalanceFeed {
    #[must_use]
    pub const fn new(connection: ConnectionHandle, events: broadcast::Sender<EngineEvent>) -> Self {
        Self { connection, events }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run().await {
                warn!(error = %e, "Balance feed stopped");
            }
        })
    }

    /// # Errors
    ///
    /// Fails if the connection is closed.
    pub async fn run(self) -> Result<(), TransportError> {
        let (_, mut updates) = self
            .connection
            .subscribe_channel(SubscriptionSpec::balance())
            .await?;
        while let Some(update) = updates.recv().await {
            match update {
                StreamUpdate::Balance(balance) => {
                    debug!(balance = %balance.balance, currency = %balance.currency, "Balance");
                    let _ = self.events.send(EngineEvent::Balance(balance));
                }
                StreamUpdate::Error { code, message } => {
                    warn!(%code, %message, "Balance stream rejected");
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(TransportError::Closed)
    }
}
