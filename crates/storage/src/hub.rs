//! Change notification hub
//!
//! Every collection owns a `ChangeHub`: an ordered registry of listeners
//! notified with the exact set of keys that changed at the most recent
//! flush. The collection name is passed explicitly with every batch so a
//! single listener can serve many collections.
//!
//! Listeners are invoked in registration order, synchronously, on the
//! flushing thread. The registry lock is not held while listeners run, so a
//! listener may register or deregister other listeners.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::Key;

/// Receives changed-key batches
pub trait ChangeListener: Send + Sync {
    /// Called once per flush with every key whose visible value changed
    fn values_changed(&self, collection: &str, keys: &[Key]);
}

impl<F> ChangeListener for F
where
    F: Fn(&str, &[Key]) + Send + Sync,
{
    fn values_changed(&self, collection: &str, keys: &[Key]) {
        self(collection, keys)
    }
}

/// Handle returned by registration, used to deregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Ordered listener registry
#[derive(Default)]
pub struct ChangeHub {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn ChangeListener>)>>,
}

impl ChangeHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener at the end of the notification order
    pub fn register(&self, listener: Arc<dyn ChangeListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn deregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Notify every listener of a changed-key batch
    pub fn publish(&self, collection: &str, keys: &[Key]) {
        let snapshot: Vec<Arc<dyn ChangeListener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener.values_changed(collection, keys);
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Check if no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Remove every listener
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_in_registration_order() {
        let hub = ChangeHub::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            hub.register(Arc::new(move |name: &str, keys: &[Key]| {
                seen.lock().push((tag, name.to_string(), keys.to_vec()));
            }));
        }

        hub.publish("users", &[1, 2]);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("first", "users".to_string(), vec![1, 2]));
        assert_eq!(seen[1].0, "second");
    }

    #[test]
    fn test_deregister() {
        let hub = ChangeHub::new();
        let id = hub.register(Arc::new(|_: &str, _: &[Key]| {}));
        assert_eq!(hub.len(), 1);
        assert!(hub.deregister(id));
        assert!(!hub.deregister(id));
        assert!(hub.is_empty());
    }

    #[test]
    fn test_listener_may_deregister_during_publish() {
        let hub = Arc::new(ChangeHub::new());
        let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
        let hub_ref = Arc::clone(&hub);
        let slot_ref = Arc::clone(&slot);
        let id = hub.register(Arc::new(move |_: &str, _: &[Key]| {
            if let Some(id) = slot_ref.lock().take() {
                hub_ref.deregister(id);
            }
        }));
        *slot.lock() = Some(id);

        hub.publish("c", &[1]);
        assert!(hub.is_empty());
    }
}
