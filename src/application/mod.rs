//! Application services (use cases).
//!
//! These services own the system's state and coordinate adapters through
//! the ports:
//!
//! - [`connection`] - the single venue connection and its driver task
//! - [`subscription`] - logical subscriptions replayed across reconnects
//! - [`market`] - tick normalisation and digit statistics
//! - [`feed`] - stream consumers feeding the normaliser and events
//! - [`engine`] - one-trade-at-a-time execution state machine
//! - [`risk`] - martingale stake controller
//! - [`session`] - start/stop/submit surface and the autonomous loop

pub mod connection;
pub mod engine;
pub mod event;
pub mod feed;
pub mod market;
pub mod risk;
pub mod session;
pub mod subscription;
