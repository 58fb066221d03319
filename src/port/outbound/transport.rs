//! Transport port: one persistent, message-oriented connection to the venue.
//!
//! The connection manager speaks in typed [`Envelope`]s and [`Inbound`]
//! messages; adapters own the wire encoding. Every outbound request carries a
//! [`ReqId`] that the venue echoes on every reply, including every later
//! message of a stream the request opened.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    BalanceUpdate, ContractId, ContractUpdate, Proposal, Purchase, ReqId, SubscriptionSpec,
    TickUpdate, TradeRequest,
};
use crate::error::Result;

/// API token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiToken(***)")
    }
}

/// Outbound command bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Authorize { token: ApiToken },
    Ping,
    Subscribe(SubscriptionSpec),
    Forget { subscription_id: String },
    Proposal { request: TradeRequest, currency: String },
    Buy { proposal_id: String, price: Decimal },
    /// List open contracts; used to verify ambiguous purchases.
    Portfolio,
}

impl Outbound {
    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::Ping => "ping",
            Self::Subscribe(_) => "subscribe",
            Self::Forget { .. } => "forget",
            Self::Proposal { .. } => "proposal",
            Self::Buy { .. } => "buy",
            Self::Portfolio => "portfolio",
        }
    }
}

/// A correlated outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub req_id: ReqId,
    pub body: Outbound,
}

/// An error reply from the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenueError {
    pub code: String,
    pub message: String,
    /// Message type the error answers.
    pub msg_type: String,
}

/// An open contract as listed by a portfolio query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenContract {
    pub contract_id: ContractId,
    pub symbol: String,
    pub contract_type: String,
    pub buy_price: Decimal,
    pub payout: Decimal,
    pub purchased_at: DateTime<Utc>,
}

/// Decoded inbound payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundBody {
    Authorized { login_id: String },
    Pong,
    Tick(TickUpdate),
    Proposal(Proposal),
    Bought(Purchase),
    Contract(ContractUpdate),
    Balance(BalanceUpdate),
    Portfolio(Vec<OpenContract>),
    Forgotten,
    Error(VenueError),
    /// Recognised envelope, unmodelled message type.
    Other { msg_type: String },
}

/// An inbound message with its correlation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub req_id: Option<ReqId>,
    /// Venue stream id, present on stream messages.
    pub subscription_id: Option<String>,
    pub body: InboundBody,
}

impl Inbound {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.body, InboundBody::Error(_))
    }
}

/// What the transport yields while open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Message(Inbound),
    /// The socket closed or failed; the connection must be re-established.
    Closed { reason: String },
}

/// A persistent streaming connection.
///
/// Implementations are reconnectable: after a [`TransportFrame::Closed`] the
/// manager calls [`connect`](Transport::connect) again on the same value.
#[async_trait]
pub trait Transport: Send {
    /// Open (or re-open) the socket.
    async fn connect(&mut self) -> Result<()>;

    /// Transmit one message.
    async fn send(&mut self, envelope: &Envelope) -> Result<()>;

    /// Next frame from the open socket. Must be cancel-safe.
    async fn next_frame(&mut self) -> TransportFrame;

    /// Close the socket, if open.
    async fn close(&mut self);

    /// Venue name for logging.
    fn venue_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_redacted_in_debug() {
        let body = Outbound::Authorize {
            token: ApiToken::new("a1-secret"),
        };
        let rendered = format!("{body:?}");
        assert!(!rendered.contains("a1-secret"));
        assert!(rendered.contains("***"));
    }
}
