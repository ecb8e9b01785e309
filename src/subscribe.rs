//! Listener registry notified after every store write batch.
//!
//! Callbacks receive no payload: the registry signals that something changed,
//! and subscribers re-run their own read pass and diff the result themselves.

use std::sync::Arc;

/// A registered change listener.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

/// Ordered list of listeners. Notification order is registration order.
#[derive(Default)]
pub struct SubscriberRegistry {
    next_token: u64,
    listeners: Vec<(u64, Callback)>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionToken {
        let token = self.next_token;
        self.next_token += 1;
        self.listeners.push((token, Arc::new(callback)));
        SubscriptionToken(token)
    }

    /// Remove a listener. Idempotent: unsubscribing twice is a no-op.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(id, _)| *id != token.0);
        self.listeners.len() != before
    }

    /// Stable snapshot of the current listeners, in registration order.
    ///
    /// A notify pass invokes the snapshot rather than the live list, so a
    /// callback unsubscribing mid-notification cannot skip or double-invoke
    /// the other listeners.
    pub fn snapshot(&self) -> Vec<Callback> {
        self.listeners
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn listeners_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriberRegistry::new();
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry.subscribe(move || order.lock().unwrap().push(label));
        }
        for callback in registry.snapshot() {
            callback();
        }
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut registry = SubscriberRegistry::new();
        let token = registry.subscribe(|| {});
        assert!(registry.unsubscribe(token));
        assert!(!registry.unsubscribe(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_unsubscribes() {
        let count = Arc::new(Mutex::new(0usize));
        let mut registry = SubscriberRegistry::new();
        let tracked = {
            let count = Arc::clone(&count);
            registry.subscribe(move || *count.lock().unwrap() += 1)
        };
        let snapshot = registry.snapshot();
        registry.unsubscribe(tracked);
        for callback in snapshot {
            callback();
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
