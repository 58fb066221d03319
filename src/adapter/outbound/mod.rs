//! Outbound adapters (driven side).

pub mod memory;
pub mod simulated;
pub mod sqlite;
pub mod venue;
