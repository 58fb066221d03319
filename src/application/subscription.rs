//! Subscription registry.
//!
//! Tracks every logical subscription with its handler so it can be re-issued
//! verbatim after a reconnect. Owned by the connection driver task and only
//! mutated through the methods below.
//!
//! Each entry moves through three bindings:
//!
//! - registered: has a spec and handler, not yet on the wire
//! - bound: issued under a request id; replies route by that id
//! - live: the venue has assigned a stream id, which `forget` needs
//!
//! A disconnect drops every entry back to registered.

use std::collections::{BTreeMap, HashMap, HashSet};

use tokio::sync::mpsc;

use crate::domain::{ReqId, StreamUpdate, SubscriptionId, SubscriptionSpec};

/// Delivery side of a subscription.
pub type UpdateSender = mpsc::UnboundedSender<StreamUpdate>;

#[derive(Debug)]
struct Entry {
    spec: SubscriptionSpec,
    handler: UpdateSender,
    req_id: Option<ReqId>,
    venue_id: Option<String>,
}

/// What was known about a subscription when it was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub spec: SubscriptionSpec,
    pub req_id: Option<ReqId>,
    pub venue_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    entries: BTreeMap<SubscriptionId, Entry>,
    by_req: HashMap<ReqId, SubscriptionId>,
    /// Issued, then removed before the venue named the stream.
    orphans: HashSet<ReqId>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription. It is not on the wire until [`bind`](Self::bind).
    pub fn register(&mut self, spec: SubscriptionSpec, handler: UpdateSender) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId::new(self.next_id);
        self.entries.insert(
            id,
            Entry {
                spec,
                handler,
                req_id: None,
                venue_id: None,
            },
        );
        id
    }

    /// Record the request id a subscription was issued under.
    pub fn bind(&mut self, id: SubscriptionId, req_id: ReqId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if let Some(previous) = entry.req_id.replace(req_id) {
            self.by_req.remove(&previous);
        }
        entry.venue_id = None;
        self.by_req.insert(req_id, id);
    }

    /// Subscription a reply belongs to.
    #[must_use]
    pub fn resolve(&self, req_id: ReqId) -> Option<SubscriptionId> {
        self.by_req.get(&req_id).copied()
    }

    pub fn set_venue_id(&mut self, id: SubscriptionId, venue_id: &str) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.venue_id.as_deref() != Some(venue_id) {
                entry.venue_id = Some(venue_id.to_string());
            }
        }
    }

    /// Hand an update to the subscription's handler.
    ///
    /// Returns false if the subscription is unknown or its receiver is gone.
    pub fn notify(&self, id: SubscriptionId, update: StreamUpdate) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.handler.send(update).is_ok())
    }

    /// Remove a subscription. `None` for unknown ids.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removed> {
        let entry = self.entries.remove(&id)?;
        if let Some(req_id) = entry.req_id {
            self.by_req.remove(&req_id);
            if entry.venue_id.is_none() {
                self.orphans.insert(req_id);
            }
        }
        Some(Removed {
            spec: entry.spec,
            req_id: entry.req_id,
            venue_id: entry.venue_id,
        })
    }

    /// Remove a subscription the venue refused. Nothing is left to forget,
    /// so no orphan mark is kept.
    pub fn discard(&mut self, id: SubscriptionId) -> bool {
        let Some(entry) = self.entries.remove(&id) else {
            return false;
        };
        if let Some(req_id) = entry.req_id {
            self.by_req.remove(&req_id);
        }
        true
    }

    /// Whether `req_id` belonged to a stream removed before it was named.
    /// Clears the mark.
    pub fn take_orphan(&mut self, req_id: ReqId) -> bool {
        self.orphans.remove(&req_id)
    }

    /// Forget all wire bindings after the link dropped.
    pub fn clear_bindings(&mut self) {
        for entry in self.entries.values_mut() {
            entry.req_id = None;
            entry.venue_id = None;
        }
        self.by_req.clear();
        self.orphans.clear();
    }

    /// Subscriptions waiting to be issued, in registration order.
    #[must_use]
    pub fn unbound(&self) -> Vec<(SubscriptionId, SubscriptionSpec)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.req_id.is_none())
            .map(|(id, entry)| (*id, entry.spec.clone()))
            .collect()
    }

    /// Specs of every active subscription, sorted.
    #[must_use]
    pub fn active_specs(&self) -> Vec<SubscriptionSpec> {
        let mut specs: Vec<_> = self.entries.values().map(|e| e.spec.clone()).collect();
        specs.sort();
        specs
    }

    /// Drop subscriptions whose handlers have gone away.
    pub fn prune_closed(&mut self) -> Vec<(SubscriptionId, Removed)> {
        let closed: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.handler.is_closed())
            .map(|(id, _)| *id)
            .collect();
        closed
            .into_iter()
            .filter_map(|id| self.remove(id).map(|removed| (id, removed)))
            .collect()
    }

    #[must_use]
    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BalanceUpdate, ContractId};
    use rust_decimal_macros::dec;

    fn channel() -> (UpdateSender, mpsc::UnboundedReceiver<StreamUpdate>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_then_bind_routes_replies() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(SubscriptionSpec::ticks("R_100"), tx);

        assert_eq!(registry.unbound().len(), 1);
        registry.bind(id, ReqId::new(7));
        assert_eq!(registry.resolve(ReqId::new(7)), Some(id));
        assert!(registry.unbound().is_empty());
    }

    #[test]
    fn clear_bindings_keeps_subscriptions_for_replay() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let a = registry.register(SubscriptionSpec::ticks("R_100"), tx.clone());
        let b = registry.register(SubscriptionSpec::contract(ContractId::from("11")), tx);
        registry.bind(a, ReqId::new(1));
        registry.bind(b, ReqId::new(2));
        registry.set_venue_id(a, "abc");
        let before = registry.active_specs();

        registry.clear_bindings();

        assert_eq!(registry.resolve(ReqId::new(1)), None);
        let replay: Vec<_> = registry.unbound().into_iter().map(|(id, _)| id).collect();
        assert_eq!(replay, vec![a, b]);
        assert_eq!(registry.active_specs(), before);
    }

    #[test]
    fn rebinding_drops_the_old_request_id() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(SubscriptionSpec::balance(), tx);
        registry.bind(id, ReqId::new(1));
        registry.bind(id, ReqId::new(5));
        assert_eq!(registry.resolve(ReqId::new(1)), None);
        assert_eq!(registry.resolve(ReqId::new(5)), Some(id));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(SubscriptionSpec::balance(), tx);
        registry.bind(id, ReqId::new(3));
        registry.set_venue_id(id, "stream-1");

        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.venue_id.as_deref(), Some("stream-1"));
        assert!(registry.remove(id).is_none());
        assert!(!registry.take_orphan(ReqId::new(3)));
    }

    #[test]
    fn removal_before_venue_id_marks_orphan() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(SubscriptionSpec::ticks("R_10"), tx);
        registry.bind(id, ReqId::new(9));
        registry.remove(id);

        assert!(registry.take_orphan(ReqId::new(9)));
        assert!(!registry.take_orphan(ReqId::new(9)));
    }

    #[test]
    fn discarded_subscription_leaves_no_orphan() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, _rx) = channel();
        let id = registry.register(SubscriptionSpec::ticks("R_10"), tx);
        registry.bind(id, ReqId::new(4));

        assert!(registry.discard(id));
        assert!(!registry.discard(id));
        assert!(!registry.contains(id));
        assert_eq!(registry.resolve(ReqId::new(4)), None);
        assert!(!registry.take_orphan(ReqId::new(4)));
    }

    #[test]
    fn notify_reports_dropped_receiver() {
        let mut registry = SubscriptionRegistry::new();
        let (tx, rx) = channel();
        let id = registry.register(SubscriptionSpec::balance(), tx);
        let update = StreamUpdate::Balance(BalanceUpdate {
            balance: dec!(10),
            currency: "USD".into(),
        });

        assert!(registry.notify(id, update.clone()));
        drop(rx);
        assert!(!registry.notify(id, update));
        assert_eq!(registry.prune_closed().len(), 1);
        assert!(registry.is_empty());
    }
}
