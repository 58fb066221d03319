//! Tick observations and last-digit extraction.
//!
//! The last digit of a quote is the outcome variable of every digit contract,
//! so extraction must be reproducible. The rule used throughout the crate:
//!
//! 1. Parse the quote's textual form as an exact decimal (no binary float).
//! 2. When the symbol's pip size is known, round half away from zero to that
//!    many decimals and right-pad with zeros (`"100"` at pip 2 is `"100.00"`).
//! 3. Take the last character of the resulting text.
//!
//! ```
//! use stakerunner::domain::tick::last_digit;
//!
//! assert_eq!(last_digit("12345.67", None).unwrap().1, 7);
//! assert_eq!(last_digit("100.00", None).unwrap().1, 0);
//! assert_eq!(last_digit("100", Some(2)).unwrap().1, 0);
//! ```

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::id::Symbol;

/// Largest scale a `Decimal` can carry.
const MAX_PIP_SIZE: u32 = 28;

/// A single normalised price update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickObservation {
    pub symbol: Symbol,
    /// Quote at the symbol's precision.
    pub quote: Decimal,
    /// Least-significant decimal digit of `quote`.
    pub digit: u8,
    /// Venue epoch (seconds).
    pub epoch: i64,
    /// Stream segment the tick belongs to. Bumped after every reconnect;
    /// consecutive observations with different segments are not contiguous.
    pub segment: u64,
}

impl TickObservation {
    /// True for digits 0, 2, 4, 6, 8.
    #[must_use]
    pub const fn is_even(&self) -> bool {
        self.digit % 2 == 0
    }

    /// True for digits 5-9.
    #[must_use]
    pub const fn is_high(&self) -> bool {
        self.digit >= 5
    }
}

/// Normalise a quote and extract its last digit.
///
/// Returns the normalised quote together with the digit.
///
/// # Errors
///
/// Returns [`DomainError::InvalidQuote`] if `raw` is not decimal text.
pub fn last_digit(raw: &str, pip_size: Option<u32>) -> Result<(Decimal, u8), DomainError> {
    let invalid = || DomainError::InvalidQuote {
        quote: raw.to_string(),
    };

    let parsed = Decimal::from_str(raw.trim()).map_err(|_| invalid())?;
    let quote = match pip_size {
        Some(pip) => {
            let pip = pip.min(MAX_PIP_SIZE);
            let mut rounded = parsed.round_dp_with_strategy(pip, RoundingStrategy::MidpointAwayFromZero);
            rounded.rescale(pip);
            rounded
        }
        None => parsed,
    };

    let digit = quote
        .to_string()
        .chars()
        .next_back()
        .and_then(|c| c.to_digit(10))
        .ok_or_else(invalid)?;

    Ok((quote, digit as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn takes_last_decimal_digit() {
        assert_eq!(last_digit("12345.67", None).unwrap(), (dec!(12345.67), 7));
    }

    #[test]
    fn trailing_zeros_are_significant() {
        assert_eq!(last_digit("100.00", None).unwrap().1, 0);
        assert_eq!(last_digit("100.10", None).unwrap().1, 0);
    }

    #[test]
    fn pads_to_pip_size() {
        // A venue that drops trailing zeros still yields the pip-precision digit.
        assert_eq!(last_digit("100", Some(2)).unwrap().1, 0);
        assert_eq!(last_digit("100.5", Some(2)).unwrap().1, 0);
        assert_eq!(last_digit("100.5", Some(2)).unwrap().0.to_string(), "100.50");
    }

    #[test]
    fn rounds_float_noise_away() {
        // Shortest float rendering of 0.1 + 0.2
        assert_eq!(last_digit("0.30000000000000004", Some(2)).unwrap().1, 0);
        assert_eq!(last_digit("1234.5699999999", Some(2)).unwrap().1, 7);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(last_digit("1.235", Some(2)).unwrap().1, 4);
        assert_eq!(last_digit("1.245", Some(2)).unwrap().1, 5);
    }

    #[test]
    fn integer_quotes_use_units_digit() {
        assert_eq!(last_digit("9873", None).unwrap().1, 3);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            last_digit("n/a", None),
            Err(DomainError::InvalidQuote { .. })
        ));
        assert!(last_digit("", Some(2)).is_err());
    }

    #[test]
    fn parity_and_range_helpers() {
        let obs = TickObservation {
            symbol: Symbol::from("R_100"),
            quote: dec!(10.07),
            digit: 7,
            epoch: 1,
            segment: 0,
        };
        assert!(!obs.is_even());
        assert!(obs.is_high());
    }
}
