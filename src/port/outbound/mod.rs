//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! These contracts describe infrastructure dependencies: the venue socket,
//! the contract execution backend and the trade ledger.

pub mod execution;
pub mod ledger;
pub mod transport;
