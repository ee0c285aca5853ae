//! Change notification for cache mutations.
//!
//! Listeners run synchronously on the mutating caller's thread, after the
//! mutation is visible. A listener may unsubscribe itself (or others) from
//! inside the callback.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    Set { key: String },
    Removed { key: String },
    Cleared { count: usize },
    /// Capacity sweep in the keyed cache.
    Swept { removed: usize },
    /// A settled result reached the durable store.
    Persisted { key: String },
    /// Expired dedup entries dropped by `purge_stale`.
    Purged { removed: usize },
}

/// Receiver of cache events.
pub trait CacheListener: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

impl<F> CacheListener for F
where
    F: Fn(&CacheEvent) + Send + Sync,
{
    fn on_event(&self, event: &CacheEvent) {
        self(event)
    }
}

type Registered = Vec<(u64, Arc<dyn CacheListener>)>;

/// Listeners attached to one cache.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Arc<Mutex<Registered>>,
    next_id: AtomicU64,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn registered(listeners: &Mutex<Registered>) -> MutexGuard<'_, Registered> {
        listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a listener. It stays attached until the returned handle is
    /// dropped or [`Subscription::unsubscribe`] is called.
    #[must_use = "dropping the Subscription detaches the listener"]
    pub fn subscribe(&self, listener: Arc<dyn CacheListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Self::registered(&self.listeners).push((id, listener));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Deliver `event` to every listener attached at call time.
    pub fn notify(&self, event: CacheEvent) {
        // Snapshot first so callbacks can (un)subscribe without deadlocking
        let snapshot: Vec<_> = Self::registered(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        Self::registered(&self.listeners).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

/// Handle for an attached listener.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Registered>>,
}

impl Subscription {
    /// Detach the listener. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    fn detach(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            ListenerSet::registered(&listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn CacheListener>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let listener: Arc<dyn CacheListener> = Arc::new(move |_: &CacheEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, listener)
    }

    #[test]
    fn test_notify_reaches_all_listeners() {
        let set = ListenerSet::new();
        let (a, listener_a) = counter();
        let (b, listener_b) = counter();
        let _sub_a = set.subscribe(listener_a);
        let _sub_b = set.subscribe(listener_b);

        set.notify(CacheEvent::Set {
            key: "k".to_string(),
        });
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_drop_detach() {
        let set = ListenerSet::new();
        let (a, listener_a) = counter();
        let (b, listener_b) = counter();
        let sub_a = set.subscribe(listener_a);
        let sub_b = set.subscribe(listener_b);
        assert_eq!(set.len(), 2);

        sub_a.unsubscribe();
        drop(sub_b);
        assert!(set.is_empty());

        set.notify(CacheEvent::Cleared { count: 0 });
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscription_outliving_set_is_harmless() {
        let set = ListenerSet::new();
        let (_, listener) = counter();
        let sub = set.subscribe(listener);
        drop(set);
        sub.unsubscribe();
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let json = serde_json::to_string(&CacheEvent::Swept { removed: 3 }).expect("serialize");
        assert_eq!(json, r#"{"type":"swept","removed":3}"#);
    }
}
