//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`] - `ScriptedTransport` and its `VenueControl`, an
//!   in-process venue for connection tests.
//! - [`backend`] - `ScriptedBackend`, an execution backend driven by the test.
//! - [`ledger`] - ledger doubles such as `FailingLedger`.
//! - [`domain`] - builders for trades, requests and stream payloads.
//! - [`config`] - canonical test configurations.

pub mod backend;
pub mod config;
pub mod domain;
pub mod ledger;
pub mod transport;
