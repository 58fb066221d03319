//! Canonical test configurations.
//!
//! Single source of truth for config structs used across tests.

use rust_decimal::Decimal;

use crate::infrastructure::config::connection::{ConnectionConfig, ReconnectionConfig};
use crate::infrastructure::config::execution::{ExecutionConfig, ExecutionMode};
use crate::infrastructure::config::settings::Config;
use crate::infrastructure::config::strategy::StrategyConfig;

/// Reconnection with a short fixed delay and `max_attempts` tries.
pub fn reconnection(max_attempts: u32) -> ReconnectionConfig {
    ReconnectionConfig {
        initial_delay_ms: 100,
        max_delay_ms: 100,
        backoff_multiplier: 1.0,
        max_attempts,
    }
}

/// One-second heartbeat, three-second timeout, small queue.
pub fn connection(outbound_queue_capacity: usize) -> ConnectionConfig {
    ConnectionConfig {
        heartbeat_interval_ms: 1_000,
        heartbeat_timeout_ms: 3_000,
        outbound_queue_capacity,
        connect_timeout_ms: 2_000,
    }
}

/// Base stake 1, doubling, three-loss ceiling, target 10.
pub fn strategy(session: &str) -> StrategyConfig {
    StrategyConfig {
        session: session.to_string(),
        base_stake: Decimal::ONE,
        martingale_multiplier: Decimal::TWO,
        max_consecutive_losses: 3,
        target_profit: Decimal::TEN,
        retry_delay_ms: 10,
        ..StrategyConfig::default()
    }
}

/// Simulated execution against an in-memory database.
pub fn simulated(session: &str) -> Config {
    Config {
        strategy: strategy(session),
        execution: ExecutionConfig {
            mode: ExecutionMode::Simulated,
            ..ExecutionConfig::default()
        },
        database: ":memory:".into(),
        ..Config::default()
    }
}
