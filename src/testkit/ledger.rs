//! Ledger doubles.

use async_trait::async_trait;

use crate::domain::{ExecutedTrade, SessionAggregate};
use crate::error::{Error, Result};
use crate::port::{HistoryQuery, TradeLedger};

/// A ledger whose storage is gone: every write fails, reads are empty.
pub struct FailingLedger;

#[async_trait]
impl TradeLedger for FailingLedger {
    async fn append(&self, trade: &ExecutedTrade) -> Result<SessionAggregate> {
        Err(Error::Database(format!(
            "disk I/O error while recording contract {}",
            trade.contract_id
        )))
    }

    async fn history(&self, _query: &HistoryQuery) -> Result<Vec<ExecutedTrade>> {
        Ok(Vec::new())
    }

    async fn aggregate(&self, _session: &str) -> Result<Option<SessionAggregate>> {
        Ok(None)
    }

    async fn rebuild_aggregate(&self, session: &str) -> Result<SessionAggregate> {
        Err(Error::Database(format!("cannot rebuild aggregate for {session}")))
    }
}
