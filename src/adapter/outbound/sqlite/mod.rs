//! SQLite persistence adapters.
//!
//! Provides the SQLite-backed trade ledger using Diesel ORM.

pub mod database;
pub mod ledger;

pub use ledger::SqliteLedger;
