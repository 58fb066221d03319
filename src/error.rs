use thiserror::Error;

use crate::domain::error::DomainError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Connection-level errors.
///
/// Transient variants are retried by the reconnect policy; fatal ones end the
/// connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection dropped before a reply arrived")]
    Disconnected,

    #[error("outbound queue full ({capacity} messages)")]
    QueueFull { capacity: usize },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("reconnect attempts exhausted after {attempts} tries")]
    RetriesExhausted { attempts: u32 },

    #[error("connection closed")]
    Closed,

    #[error("timed out: {0}")]
    Timeout(&'static str),

    #[error("socket error: {0}")]
    Socket(String),
}

impl TransportError {
    /// Fatal errors never enter the reconnect loop.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthFailed(_) | Self::RetriesExhausted { .. } | Self::Closed
        )
    }
}

/// Per-trade failures. No stake is at risk for any of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    /// Session halted or another trade still awaiting settlement.
    #[error("EngineBusy")]
    EngineBusy,

    #[error("proposal rejected: {0}")]
    ProposalRejected(String),

    /// Verified with the venue: no contract was bought.
    #[error("buy failed: {0}")]
    BuyFailed(String),

    #[error("{stage} timed out")]
    Timeout { stage: &'static str },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Trade(#[from] TradeError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl From<diesel::result::Error> for Error {
    fn from(err: diesel::result::Error) -> Self {
        Error::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_busy_display_is_stable() {
        assert_eq!(TradeError::EngineBusy.to_string(), "EngineBusy");
    }

    #[test]
    fn fatal_transport_errors() {
        assert!(TransportError::AuthFailed("bad token".into()).is_fatal());
        assert!(TransportError::RetriesExhausted { attempts: 3 }.is_fatal());
        assert!(!TransportError::Disconnected.is_fatal());
        assert!(!TransportError::QueueFull { capacity: 1 }.is_fatal());
    }

    #[test]
    fn transport_error_lifts_into_trade_error() {
        let err: TradeError = TransportError::Disconnected.into();
        assert!(matches!(err, TradeError::Transport(TransportError::Disconnected)));
    }
}
