//! SQLite trade ledger.
//!
//! Settled trades land in `trades` (one row per contract id) and each
//! append folds the trade into `session_aggregates` inside the same
//! transaction.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use rust_decimal::Decimal;
use tracing::debug;

use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations, DbPool};
use crate::adapter::outbound::sqlite::database::model::{AggregateRow, NewTradeRow, TradeRow};
use crate::adapter::outbound::sqlite::database::schema::{session_aggregates, trades};
use crate::domain::{
    ContractId, ContractType, ExecutedTrade, SessionAggregate, Symbol, TradeId, TradeResult,
};
use crate::error::{Error, Result};
use crate::port::{HistoryQuery, TradeLedger};

/// SQLite-backed [`TradeLedger`].
pub struct SqliteLedger {
    pool: DbPool,
}

impl SqliteLedger {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `path` and migrate it.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be built or migrations fail.
    pub fn open(path: &str) -> Result<Self> {
        let pool = create_pool(path)?;
        run_migrations(&pool)?;
        Ok(Self::new(pool))
    }

    fn conn(&self) -> Result<diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<SqliteConnection>>> {
        self.pool.get().map_err(|e| Error::Connection(e.to_string()))
    }

    fn to_row(trade: &ExecutedTrade) -> NewTradeRow {
        NewTradeRow {
            id: trade.id.to_string(),
            session: trade.session.clone(),
            contract_id: trade.contract_id.to_string(),
            symbol: trade.symbol.to_string(),
            contract_type: trade.contract_type.as_str().to_string(),
            barrier: trade.barrier.map(i32::from),
            stake: trade.stake.to_string(),
            payout: trade.payout.to_string(),
            profit: trade.profit.to_string(),
            result: trade.result.as_str().to_string(),
            entry_at: trade.entry_at.to_rfc3339(),
            exit_at: trade.exit_at.map(|at| at.to_rfc3339()),
        }
    }

    fn from_row(row: TradeRow) -> Result<ExecutedTrade> {
        Ok(ExecutedTrade {
            id: TradeId::from(row.id),
            session: row.session,
            contract_id: ContractId::new(row.contract_id),
            symbol: Symbol::new(row.symbol),
            contract_type: ContractType::from_str(&row.contract_type)?,
            barrier: row
                .barrier
                .map(|b| u8::try_from(b).map_err(|e| Error::Parse(e.to_string())))
                .transpose()?,
            stake: decimal(&row.stake)?,
            payout: decimal(&row.payout)?,
            profit: decimal(&row.profit)?,
            result: TradeResult::from_str(&row.result).map_err(Error::Parse)?,
            entry_at: timestamp(&row.entry_at)?,
            exit_at: row.exit_at.as_deref().map(timestamp).transpose()?,
        })
    }

    fn aggregate_to_row(aggregate: &SessionAggregate) -> Result<AggregateRow> {
        Ok(AggregateRow {
            session: aggregate.session.clone(),
            total_stake: aggregate.total_stake.to_string(),
            runs: to_count_column("runs", aggregate.runs)?,
            wins: to_count_column("wins", aggregate.wins)?,
            losses: to_count_column("losses", aggregate.losses)?,
            profit: aggregate.profit.to_string(),
            updated_at: aggregate.updated_at.to_rfc3339(),
        })
    }

    fn aggregate_from_row(row: AggregateRow) -> Result<SessionAggregate> {
        Ok(SessionAggregate {
            session: row.session,
            total_stake: decimal(&row.total_stake)?,
            runs: from_count_column("runs", row.runs)?,
            wins: from_count_column("wins", row.wins)?,
            losses: from_count_column("losses", row.losses)?,
            profit: decimal(&row.profit)?,
            updated_at: timestamp(&row.updated_at)?,
        })
    }

    fn load_aggregate(conn: &mut SqliteConnection, session: &str) -> Result<Option<SessionAggregate>> {
        session_aggregates::table
            .find(session)
            .select(AggregateRow::as_select())
            .first(conn)
            .optional()?
            .map(Self::aggregate_from_row)
            .transpose()
    }

    fn store_aggregate(conn: &mut SqliteConnection, aggregate: &SessionAggregate) -> Result<()> {
        diesel::replace_into(session_aggregates::table)
            .values(&Self::aggregate_to_row(aggregate)?)
            .execute(conn)?;
        Ok(())
    }
}

fn decimal(text: &str) -> Result<Decimal> {
    Decimal::from_str(text).map_err(|e| Error::Parse(format!("decimal '{text}': {e}")))
}

fn timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Parse(e.to_string()))
}

fn to_count_column(column: &str, n: u32) -> Result<i32> {
    i32::try_from(n).map_err(|e| Error::Parse(format!("{column} {n}: {e}")))
}

fn from_count_column(column: &str, n: i32) -> Result<u32> {
    u32::try_from(n).map_err(|e| Error::Parse(format!("{column} {n}: {e}")))
}

#[async_trait]
impl TradeLedger for SqliteLedger {
    async fn append(&self, trade: &ExecutedTrade) -> Result<SessionAggregate> {
        let row = Self::to_row(trade);
        let mut conn = self.conn()?;

        conn.transaction(|conn| {
            let existing: i64 = trades::table
                .filter(trades::contract_id.eq(&row.contract_id))
                .count()
                .get_result(conn)?;
            if existing > 0 {
                debug!(contract = %row.contract_id, "Trade already recorded");
                return Ok(Self::load_aggregate(conn, &trade.session)?
                    .unwrap_or_else(|| SessionAggregate::empty(&trade.session)));
            }

            diesel::insert_into(trades::table).values(&row).execute(conn)?;

            let mut aggregate = Self::load_aggregate(conn, &trade.session)?
                .unwrap_or_else(|| SessionAggregate::empty(&trade.session));
            aggregate.record(trade);
            Self::store_aggregate(conn, &aggregate)?;

            debug!(contract = %row.contract_id, session = %trade.session, runs = aggregate.runs, "Recorded trade");
            Ok::<SessionAggregate, Error>(aggregate)
        })
    }

    async fn history(&self, query: &HistoryQuery) -> Result<Vec<ExecutedTrade>> {
        let mut conn = self.conn()?;

        let mut select = trades::table.select(TradeRow::as_select()).into_boxed();
        if let Some(session) = &query.session {
            select = select.filter(trades::session.eq(session.clone()));
        }
        if let Some(symbol) = &query.symbol {
            select = select.filter(trades::symbol.eq(symbol.to_string()));
        }

        let rows: Vec<TradeRow> = select
            .order(trades::seq.desc())
            .limit(i64::from(query.limit))
            .offset(i64::from(query.offset))
            .load(&mut conn)?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn aggregate(&self, session: &str) -> Result<Option<SessionAggregate>> {
        let mut conn = self.conn()?;
        Self::load_aggregate(&mut conn, session)
    }

    async fn rebuild_aggregate(&self, session: &str) -> Result<SessionAggregate> {
        let mut conn = self.conn()?;

        conn.transaction(|conn| {
            let rows: Vec<TradeRow> = trades::table
                .filter(trades::session.eq(session))
                .order(trades::seq.asc())
                .select(TradeRow::as_select())
                .load(conn)?;
            let settled = rows.into_iter().map(Self::from_row).collect::<Result<Vec<_>>>()?;

            let aggregate = SessionAggregate::from_trades(session, &settled);
            Self::store_aggregate(conn, &aggregate)?;
            debug!(session, runs = aggregate.runs, "Rebuilt session aggregate");
            Ok::<SessionAggregate, Error>(aggregate)
        })
    }
}
