//! Logical subscriptions and the updates they deliver.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ContractId, Symbol};
use super::trade::ContractUpdate;

/// What a subscription streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    TickStream,
    ContractMonitor,
    Balance,
}

/// Subscription target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubscriptionTarget {
    Symbol(Symbol),
    Contract(ContractId),
    Account,
}

/// Everything needed to (re-)issue a subscription verbatim.
///
/// Two specs are equal exactly when they describe the same stream, which is
/// the identity used when comparing subscription sets across a reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub kind: SubscriptionKind,
    pub target: SubscriptionTarget,
}

impl SubscriptionSpec {
    #[must_use]
    pub fn ticks(symbol: impl Into<Symbol>) -> Self {
        Self {
            kind: SubscriptionKind::TickStream,
            target: SubscriptionTarget::Symbol(symbol.into()),
        }
    }

    #[must_use]
    pub fn contract(contract_id: ContractId) -> Self {
        Self {
            kind: SubscriptionKind::ContractMonitor,
            target: SubscriptionTarget::Contract(contract_id),
        }
    }

    #[must_use]
    pub const fn balance() -> Self {
        Self {
            kind: SubscriptionKind::Balance,
            target: SubscriptionTarget::Account,
        }
    }
}

impl fmt::Display for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            SubscriptionTarget::Symbol(s) => write!(f, "ticks:{s}"),
            SubscriptionTarget::Contract(c) => write!(f, "contract:{c}"),
            SubscriptionTarget::Account => write!(f, "balance"),
        }
    }
}

/// Raw tick as delivered by the venue, before normalisation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickUpdate {
    pub symbol: Symbol,
    /// Quote in the venue's textual form.
    pub quote: String,
    pub epoch: i64,
    pub pip_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub balance: Decimal,
    pub currency: String,
}

/// Message delivered to a subscription handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Tick(TickUpdate),
    Contract(ContractUpdate),
    Balance(BalanceUpdate),
    /// The venue rejected or terminated the stream.
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn spec_identity_ignores_construction_path() {
        let a: BTreeSet<_> = [SubscriptionSpec::ticks("R_100"), SubscriptionSpec::balance()].into();
        let b: BTreeSet<_> = [SubscriptionSpec::balance(), SubscriptionSpec::ticks(Symbol::new("R_100"))].into();
        assert_eq!(a, b);
    }

    #[test]
    fn spec_display() {
        assert_eq!(SubscriptionSpec::ticks("R_50").to_string(), "ticks:R_50");
        assert_eq!(
            SubscriptionSpec::contract(ContractId::from("9")).to_string(),
            "contract:9"
        );
    }
}
