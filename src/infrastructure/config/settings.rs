//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all settings.
//! Configuration is loaded from a TOML file; the venue API token is only ever
//! read from the `VENUE_API_TOKEN` environment variable (a `.env` file is
//! honoured).
//!
//! # Example
//!
//! ```no_run
//! use stakerunner::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.toml")?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::connection::{ConnectionConfig, ReconnectionConfig};
use super::execution::{ExecutionConfig, ExecutionMode};
use super::logging::LoggingConfig;
use super::market::MarketConfig;
use super::strategy::StrategyConfig;
use super::venue::VenueConfig;
use crate::error::{ConfigError, Result};
use crate::port::ApiToken;

/// Environment variable holding the venue API token.
pub const API_TOKEN_ENV: &str = "VENUE_API_TOKEN";

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub venue: VenueConfig,

    /// Heartbeat and outbound queue settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Backoff and attempt ceiling for reconnects.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub strategy: StrategyConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Path to SQLite database file.
    ///
    /// Defaults to "stakerunner.db" in the current directory.
    #[serde(default = "default_database_path")]
    pub database: String,

    /// Loaded from [`API_TOKEN_ENV`], never from the file.
    #[serde(skip)]
    pub api_token: Option<ApiToken>,
}

fn default_database_path() -> String {
    "stakerunner.db".to_string()
}

impl Config {
    /// Parse configuration from TOML content, taking the token from the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        let token = std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(ApiToken::new);
        Self::parse_with_token(content, token)
    }

    /// Parse configuration from TOML content with an explicit token.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_with_token(content: &str, token: Option<ApiToken>) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.api_token = token;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML content is malformed
    /// - Validation fails
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first invalid or missing field.
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.venue.ws_url.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "ws_url" }.into());
        }
        self.venue.endpoint()?;

        let conn = &self.connection;
        if conn.heartbeat_interval_ms == 0 {
            return Err(invalid("heartbeat_interval_ms", "must be greater than 0"));
        }
        if conn.heartbeat_timeout_ms <= conn.heartbeat_interval_ms {
            return Err(invalid(
                "heartbeat_timeout_ms",
                "must be greater than heartbeat_interval_ms",
            ));
        }
        if conn.outbound_queue_capacity == 0 {
            return Err(invalid("outbound_queue_capacity", "must be greater than 0"));
        }
        if conn.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", "must be greater than 0"));
        }

        let reconnect = &self.reconnection;
        if reconnect.initial_delay_ms == 0 {
            return Err(invalid("initial_delay_ms", "must be greater than 0"));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(invalid("max_delay_ms", "must be >= initial_delay_ms"));
        }
        if reconnect.backoff_multiplier < 1.0 {
            return Err(invalid("backoff_multiplier", "must be >= 1.0"));
        }
        if reconnect.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be greater than 0"));
        }

        if self.market.buffer_capacity == 0 {
            return Err(invalid("buffer_capacity", "must be greater than 0"));
        }

        let strategy = &self.strategy;
        if strategy.session.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "session" }.into());
        }
        if strategy.symbol.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "symbol" }.into());
        }
        if strategy.base_stake <= Decimal::ZERO {
            return Err(invalid("base_stake", "must be greater than 0"));
        }
        if strategy.martingale_multiplier < Decimal::ONE {
            return Err(invalid("martingale_multiplier", "must be >= 1"));
        }
        if strategy.max_consecutive_losses == 0 {
            return Err(invalid("max_consecutive_losses", "must be greater than 0"));
        }
        if strategy.target_profit <= Decimal::ZERO {
            return Err(invalid("target_profit", "must be greater than 0"));
        }
        if strategy.duration == 0 {
            return Err(invalid("duration", "must be greater than 0"));
        }
        if let Err(e) = strategy.request(strategy.base_stake) {
            return Err(invalid("barrier", &e.to_string()));
        }

        let execution = &self.execution;
        if execution.propose_timeout_ms == 0 || execution.buy_timeout_ms == 0 {
            return Err(invalid("execution_timeouts", "must be greater than 0"));
        }
        if execution.payout_ratio <= Decimal::ONE {
            return Err(invalid("payout_ratio", "must be greater than 1"));
        }
        if execution.mode == ExecutionMode::Live && self.api_token.is_none() {
            return Err(ConfigError::MissingField {
                field: API_TOKEN_ENV,
            }
            .into());
        }

        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

fn invalid(field: &'static str, reason: &str) -> crate::error::Error {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
    .into()
}
