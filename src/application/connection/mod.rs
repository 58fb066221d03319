//! Venue connection management.
//!
//! One driver task ([`ConnectionManager`]) exclusively owns the transport,
//! the subscription registry, the outbound queue and the table of requests
//! awaiting replies. Everything else talks to it through a cloneable
//! [`ConnectionHandle`].
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ack──▶ Open ──timeout/close──▶ Reconnecting
//!                                        ▲                          │
//!                                        └────────success───────────┤
//!                                                                   ▼
//!                                                      Closed (exhausted / auth)
//! ```

mod backoff;
mod handle;
mod manager;

use std::fmt;

use chrono::{DateTime, Utc};

use crate::domain::SubscriptionSpec;
use crate::error::TransportError;
use crate::port::VenueError;

pub use backoff::Backoff;
pub use handle::ConnectionHandle;
pub use manager::{ConnectionManager, ConnectionOptions};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable connection events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    /// Link restored; every subscription has been re-issued. Streams resume
    /// from here with a gap.
    Reconnected { attempts: u32 },
    /// Venue error that matched no waiting request or subscription.
    VenueError(VenueError),
    /// The connection closed for good.
    Fatal(TransportError),
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    /// Reconnect attempts since the link was last open.
    pub reconnect_attempts: u32,
    pub queued: usize,
    pub pending_requests: usize,
    pub subscriptions: Vec<SubscriptionSpec>,
    pub last_inbound_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests;
