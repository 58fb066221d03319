//! Application wiring.
//!
//! [`App::build`] turns a validated [`Config`] into a connected venue link, a
//! running tick feed and an idle [`Session`] ready to be started.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::adapter::outbound::simulated::SimulatedBackend;
use crate::adapter::outbound::sqlite::SqliteLedger;
use crate::adapter::outbound::venue::{VenueBackend, VenueStream};
use crate::application::connection::{ConnectionHandle, ConnectionManager, ConnectionOptions};
use crate::application::engine::{EngineSettings, TradeEngine};
use crate::application::feed::{BalanceFeed, TickFeed};
use crate::application::market::MarketDataNormalizer;
use crate::application::risk::StakeController;
use crate::application::session::Session;
use crate::domain::Symbol;
use crate::error::Result;
use crate::infrastructure::config::execution::ExecutionMode;
use crate::infrastructure::config::settings::Config;
use crate::port::{ExecutionBackend, TradeLedger, Transport};

/// How long shutdown waits for an in-flight contract to settle.
const SETTLE_GRACE: Duration = Duration::from_secs(30);

/// A wired, connected runtime.
pub struct App {
    session: Arc<Session>,
    connection: ConnectionHandle,
    market: Arc<MarketDataNormalizer>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Connect to the configured venue and assemble the runtime.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is invalid, the ledger cannot be opened, or the
    /// connection closes for good before it opens.
    pub async fn build(config: Config) -> Result<Self> {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let transport = VenueStream::new(config.venue.endpoint()?);
        Self::build_with(config, transport).await
    }

    /// Assemble the runtime over any transport.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub async fn build_with<T: Transport + 'static>(config: Config, transport: T) -> Result<Self> {
        let ledger: Arc<dyn TradeLedger> = Arc::new(SqliteLedger::open(&config.database)?);
        let session_name = config.strategy.session.clone();
        if let Some(aggregate) = ledger.aggregate(&session_name).await? {
            info!(
                session = %session_name,
                runs = aggregate.runs,
                profit = %aggregate.profit,
                "Resuming session totals"
            );
        }

        let (connection, driver) = ConnectionManager::spawn(
            transport,
            ConnectionOptions {
                connection: config.connection.clone(),
                reconnection: config.reconnection.clone(),
                token: config.api_token.clone(),
            },
        );
        let market = Arc::new(MarketDataNormalizer::new(config.market.buffer_capacity));

        let backend: Arc<dyn ExecutionBackend> = match config.execution.mode {
            ExecutionMode::Live => Arc::new(VenueBackend::new(
                connection.clone(),
                config.venue.currency.clone(),
            )),
            ExecutionMode::Simulated => Arc::new(SimulatedBackend::new(
                Arc::clone(&market),
                config.execution.payout_ratio,
            )),
        };
        let controller = Arc::new(StakeController::new(config.strategy.stake_plan()));
        let engine = Arc::new(TradeEngine::new(
            EngineSettings::from_config(session_name.as_str(), &config.execution),
            backend,
            controller,
            Arc::clone(&ledger),
        ));
        let session = Arc::new(Session::new(Arc::clone(&engine), ledger, config.strategy.clone()));

        if let Err(e) = connection.connect().await {
            driver.abort();
            return Err(e.into());
        }

        let mut tasks = vec![driver, session.watch_connection(connection.events())];
        tasks.push(
            TickFeed::new(
                connection.clone(),
                Arc::clone(&market),
                Symbol::new(config.strategy.symbol.as_str()),
            )
            .spawn(),
        );
        if config.execution.mode == ExecutionMode::Live {
            tasks.push(BalanceFeed::new(connection.clone(), engine.event_sender()).spawn());
        }

        info!(
            session = %session_name,
            mode = ?config.execution.mode,
            symbol = %config.strategy.symbol,
            "Runtime ready"
        );
        Ok(Self {
            session,
            connection,
            market,
            tasks,
        })
    }

    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    #[must_use]
    pub const fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    #[must_use]
    pub const fn market(&self) -> &Arc<MarketDataNormalizer> {
        &self.market
    }

    /// Stop trading, let an open contract settle, then close the link.
    pub async fn shutdown(self) {
        self.session.stop();
        if time::timeout(SETTLE_GRACE, self.session.engine().wait_idle())
            .await
            .is_err()
        {
            if let Some(trade) = self.session.in_flight() {
                warn!(contract = %trade.contract_id, "Shutting down with an unsettled contract");
            }
        }
        self.connection.shutdown().await;
        for task in self.tasks {
            task.abort();
        }
        info!("Runtime stopped");
    }
}
