//! Stakerunner - streaming venue connection and risk-bounded digit-contract
//! execution.
//!
//! The crate keeps one authenticated WebSocket link to a derivatives venue
//! alive across drops, turns its tick stream into last-digit observations, and
//! runs one digit contract at a time through propose, buy, monitor and settle
//! under a martingale stake controller. Every settled trade lands in a durable
//! SQLite ledger.
//!
//! # Architecture
//!
//! - [`domain`] - pure value types: requests, trades, ticks, risk state
//! - [`port`] - traits at the seams: transport, execution backend, ledger
//! - [`adapter`] - venue WebSocket and executor, paper backend, ledgers
//! - [`application`] - connection manager, normaliser, engine, controller,
//!   session runner
//! - [`infrastructure`] - configuration and logging
//! - [`app`] - wiring a [`Config`](infrastructure::config::settings::Config)
//!   into a running [`Session`](application::session::Session)
//!
//! # Features
//!
//! - `testkit` - expose the scripted transport, backend and builders to
//!   integration tests

pub mod adapter;
pub mod app;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
