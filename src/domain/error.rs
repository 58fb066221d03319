//! Domain validation errors.
//!
//! Returned by constructors and parsers that enforce domain invariants:
//! quotes must be decimal text, stakes must be positive, contract types
//! must be one of the supported digit contracts.

use thiserror::Error;

/// Errors that occur when domain invariants are violated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The quote text could not be read as a decimal number.
    #[error("invalid quote '{quote}'")]
    InvalidQuote {
        /// The raw quote text.
        quote: String,
    },

    /// Stakes must be strictly positive.
    #[error("stake must be positive, got {stake}")]
    InvalidStake {
        /// The rejected stake.
        stake: rust_decimal::Decimal,
    },

    /// The contract type is not one of the supported digit contracts.
    #[error("unknown contract type '{name}'")]
    UnknownContractType {
        /// The unrecognised name.
        name: String,
    },

    /// Barrier-based contracts need a digit barrier in 0..=9.
    #[error("contract {contract_type} requires a barrier digit 0-9")]
    MissingBarrier {
        /// The contract type missing its barrier.
        contract_type: &'static str,
    },
}
