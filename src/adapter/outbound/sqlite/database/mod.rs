//! SQLite database modules.
//!
//! Provides database connection management, schema definitions, and
//! Diesel model types for the trade ledger.

pub mod connection;
pub mod model;
pub mod schema;
