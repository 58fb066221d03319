use serde::Deserialize;

/// Tick history settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Observations kept per symbol.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

const fn default_buffer_capacity() -> usize {
    1_000
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
        }
    }
}
