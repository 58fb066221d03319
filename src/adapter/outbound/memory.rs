//! In-memory trade ledger for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ExecutedTrade, SessionAggregate};
use crate::error::Result;
use crate::port::{HistoryQuery, TradeLedger};

#[derive(Default)]
struct Inner {
    /// Insertion order; newest last.
    trades: Vec<ExecutedTrade>,
    aggregates: HashMap<String, SessionAggregate>,
}

/// Non-durable [`TradeLedger`] with the same semantics as the SQLite one.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().trades.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TradeLedger for InMemoryLedger {
    async fn append(&self, trade: &ExecutedTrade) -> Result<SessionAggregate> {
        let mut inner = self.inner.lock();
        let known = inner.trades.iter().any(|t| t.contract_id == trade.contract_id);
        if !known {
            inner.trades.push(trade.clone());
            inner
                .aggregates
                .entry(trade.session.clone())
                .or_insert_with(|| SessionAggregate::empty(&trade.session))
                .record(trade);
        }
        Ok(inner
            .aggregates
            .get(&trade.session)
            .cloned()
            .unwrap_or_else(|| SessionAggregate::empty(&trade.session)))
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ExecutedTrade>> {
        let inner = self.inner.lock();
        Ok(inner
            .trades
            .iter()
            .rev()
            .filter(|t| query.session.as_ref().map_or(true, |s| &t.session == s))
            .filter(|t| query.symbol.as_ref().map_or(true, |s| &t.symbol == s))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn aggregate(&self, session: &str) -> Result<Option<SessionAggregate>> {
        Ok(self.inner.lock().aggregates.get(session).cloned())
    }

    async fn rebuild_aggregate(&self, session: &str) -> Result<SessionAggregate> {
        let mut inner = self.inner.lock();
        let aggregate = SessionAggregate::from_trades(
            session,
            inner.trades.iter().filter(|t| t.session == session),
        );
        inner.aggregates.insert(session.to_string(), aggregate.clone());
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::domain::settled_trade;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn duplicate_append_keeps_first_record() {
        let ledger = InMemoryLedger::new();
        let first = ledger.append(&settled_trade("s", "1", dec!(1), dec!(0.95))).await.unwrap();
        let second = ledger.append(&settled_trade("s", "1", dec!(1), dec!(-1))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let ledger = InMemoryLedger::new();
        for id in ["1", "2", "3"] {
            ledger.append(&settled_trade("s", id, dec!(1), dec!(0.95))).await.unwrap();
        }
        let page = ledger.history(&HistoryQuery::recent(2).page(1)).await.unwrap();
        let ids: Vec<_> = page.iter().map(|t| t.contract_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }
}
