//! Capped exponential backoff with jitter and an attempt ceiling.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::connection::ReconnectionConfig;

/// Reconnect schedule.
///
/// Delay for attempt `n` (zero-based) is
/// `min(max_delay, initial × multiplier^n)` plus up to 20% random jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectionConfig,
    /// Attempts scheduled since the last reset.
    attempt: u32,
    /// Current backoff delay in milliseconds, before jitter.
    current_delay_ms: u64,
}

impl Backoff {
    #[must_use]
    pub fn new(config: ReconnectionConfig) -> Self {
        let current_delay_ms = config.initial_delay_ms;
        Self {
            config,
            attempt: 0,
            current_delay_ms,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt ceiling is
    /// reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }
        let base_delay = Duration::from_millis(self.current_delay_ms);
        let delay = base_delay + Duration::from_millis(jitter_ms(base_delay));

        let next_delay = (self.current_delay_ms as f64 * self.config.backoff_multiplier) as u64;
        self.current_delay_ms = next_delay.min(self.config.max_delay_ms);
        self.attempt += 1;

        Some(delay)
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay_ms = self.config.initial_delay_ms;
    }

    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }
}

/// Up to 20% of the base delay.
fn jitter_ms(base_delay: Duration) -> u64 {
    let jitter_range_ms = (base_delay.as_millis() as u64) / 5;
    if jitter_range_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..=jitter_range_ms)
}
