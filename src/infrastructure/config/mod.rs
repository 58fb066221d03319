//! Infrastructure configuration modules.

pub mod connection;
pub mod execution;
pub mod logging;
pub mod market;
pub mod settings;
pub mod strategy;
pub mod venue;
