//! Database model types for Diesel ORM.
//!
//! Money columns are decimal text; timestamps are RFC 3339 text.

use diesel::prelude::*;

use super::schema::{session_aggregates, trades};

/// Database row for a settled trade (queryable).
#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = trades)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TradeRow {
    pub seq: Option<i32>,
    pub id: String,
    pub session: String,
    pub contract_id: String,
    pub symbol: String,
    pub contract_type: String,
    pub barrier: Option<i32>,
    pub stake: String,
    pub payout: String,
    pub profit: String,
    pub result: String,
    pub entry_at: String,
    pub exit_at: Option<String>,
}

/// Database row for a settled trade (insertable).
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = trades)]
pub struct NewTradeRow {
    pub id: String,
    pub session: String,
    pub contract_id: String,
    pub symbol: String,
    pub contract_type: String,
    pub barrier: Option<i32>,
    pub stake: String,
    pub payout: String,
    pub profit: String,
    pub result: String,
    pub entry_at: String,
    pub exit_at: Option<String>,
}

/// Database row for a session rollup.
#[derive(Queryable, Selectable, Insertable, Debug, Clone)]
#[diesel(table_name = session_aggregates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AggregateRow {
    pub session: String,
    pub total_stake: String,
    pub runs: i32,
    pub wins: i32,
    pub losses: i32,
    pub profit: String,
    pub updated_at: String,
}
