//! Persistence port for settled trades and session rollups.

use async_trait::async_trait;

use crate::domain::{ExecutedTrade, SessionAggregate, Symbol};
use crate::error::Result;

/// Page request for trade history. Results are newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub session: Option<String>,
    pub symbol: Option<Symbol>,
    pub limit: u32,
    pub offset: u32,
}

impl HistoryQuery {
    /// Most recent `limit` trades across all sessions.
    #[must_use]
    pub const fn recent(limit: u32) -> Self {
        Self {
            session: None,
            symbol: None,
            limit,
            offset: 0,
        }
    }

    #[must_use]
    pub fn for_symbol(mut self, symbol: impl Into<Symbol>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn for_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    #[must_use]
    pub const fn page(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Durable trade ledger.
#[async_trait]
pub trait TradeLedger: Send + Sync {
    /// Store a terminal trade and fold it into its session aggregate.
    ///
    /// Both writes happen atomically. Appending a contract id that is already
    /// stored changes nothing and returns the current aggregate.
    async fn append(&self, trade: &ExecutedTrade) -> Result<SessionAggregate>;

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ExecutedTrade>>;

    async fn aggregate(&self, session: &str) -> Result<Option<SessionAggregate>>;

    /// Recompute a session aggregate from stored trades and persist it.
    async fn rebuild_aggregate(&self, session: &str) -> Result<SessionAggregate>;
}
