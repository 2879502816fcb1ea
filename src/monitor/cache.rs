// Single-flight cache
//
// Collapses concurrent requests for the same key into one computation. The
// table lock only guards key creation; waiting happens on a per-key slot.
// Results are fixed once and kept for the lifetime of the cache, failures
// included. A computation that never finishes (panic, runtime shutdown)
// abandons its slot: current and later waiters see a closed channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

enum SlotState<V> {
    /// Computation running, senders of everyone waiting for it
    Pending(Vec<oneshot::Sender<V>>),
    /// Computation finished
    Resolved(V),
    /// Computation dropped before producing a value
    Abandoned,
}

struct Slot<V> {
    state: Mutex<SlotState<V>>,
}

impl<V: Clone> Slot<V> {
    fn pending(first: oneshot::Sender<V>) -> Self {
        Self {
            state: Mutex::new(SlotState::Pending(vec![first])),
        }
    }

    /// Register a waiter, answering immediately when already resolved
    fn subscribe(&self) -> oneshot::Receiver<V> {
        let (tx, rx) = oneshot::channel();
        let mut state = lock(&self.state);
        match &mut *state {
            SlotState::Pending(waiters) => waiters.push(tx),
            SlotState::Resolved(value) => {
                let _ = tx.send(value.clone());
            }
            // Dropping `tx` closes the receiver
            SlotState::Abandoned => {}
        }
        rx
    }

    /// Fix the result and fan it out to every waiter
    fn resolve(&self, value: V) {
        let mut state = lock(&self.state);
        let waiters = match std::mem::replace(&mut *state, SlotState::Resolved(value.clone())) {
            SlotState::Pending(waiters) => waiters,
            // Resolved twice, keep the first result
            SlotState::Resolved(first) => {
                *state = SlotState::Resolved(first);
                return;
            }
            SlotState::Abandoned => {
                *state = SlotState::Abandoned;
                return;
            }
        };
        drop(state);

        for waiter in waiters {
            // Receiver gone means the requester stopped caring
            let _ = waiter.send(value.clone());
        }
    }

    /// Close every waiter unless a value was already fixed
    fn abandon(&self) {
        let mut state = lock(&self.state);
        if let SlotState::Pending(_) = &*state {
            // Senders dropped here
            *state = SlotState::Abandoned;
        }
    }
}

/// Abandons its slot when dropped without resolving it
///
/// Lives inside the spawned computation, so a panic unwinding the task or a
/// runtime dropping it still releases the waiters.
struct SlotGuard<V: Clone> {
    slot: Arc<Slot<V>>,
}

impl<V: Clone> SlotGuard<V> {
    fn resolve(self, value: V) {
        self.slot.resolve(value);
    }
}

impl<V: Clone> Drop for SlotGuard<V> {
    fn drop(&mut self) {
        self.slot.abandon();
    }
}

/// Lock a mutex, recovering the data if a holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deduplicating cache of asynchronously computed values
pub struct SingleFlight<V> {
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
}

impl<V> Default for SingleFlight<V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `key`, computing it with `factory` if nobody has yet
    ///
    /// `factory` is spawned at most once per key for the lifetime of the
    /// cache. Every caller gets its own receiver for the shared value. If the
    /// factory task panics, every receiver for `key`, present and future,
    /// errors instead.
    pub fn lookup<F, Fut>(&self, key: &str, factory: F) -> oneshot::Receiver<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        if let Some(slot) = slots.get(key) {
            let slot = slot.clone();
            drop(slots);
            tracing::trace!("cache hit for {}", key);
            return slot.subscribe();
        }

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Slot::pending(tx));
        slots.insert(key.to_string(), slot.clone());
        drop(slots);

        tracing::trace!("cache miss for {}", key);
        let computation = factory();
        tokio::spawn(async move {
            let guard = SlotGuard { slot };
            let value = computation.await;
            guard.resolve(value);
        });

        rx
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_resolved_value_served_to_late_callers() {
        let cache = SingleFlight::new();
        let first = cache.lookup("k", || async { 7u32 }).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let second = cache
            .lookup("k", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                8u32
            })
            .await
            .unwrap();

        assert_eq!((first, second), (7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_value_counts_as_resolved() {
        let cache: SingleFlight<Option<String>> = SingleFlight::new();
        assert_eq!(cache.lookup("none", || async { None }).await.unwrap(), None);

        let again = cache
            .lookup("none", || async { Some("recomputed".to_string()) })
            .await
            .unwrap();
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn test_double_resolve_keeps_first() {
        let (tx, rx) = oneshot::channel();
        let slot = Slot::pending(tx);
        slot.resolve(1);
        slot.resolve(2);

        assert_eq!(rx.await.unwrap(), 1);
        assert_eq!(slot.subscribe().await.unwrap(), 1);
    }

    #[test]
    fn test_abandon_after_resolve_keeps_value() {
        let (tx, _rx) = oneshot::channel();
        let slot = Slot::pending(tx);
        slot.resolve(3);
        slot.abandon();

        assert_eq!(slot.subscribe().try_recv().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panicking_factory_closes_every_receiver() {
        let cache: SingleFlight<u32> = SingleFlight::new();
        let first = cache.lookup("k", || async { panic!("factory failed") });
        let waiting = cache.lookup("k", || async { 1 });

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), first)
            .await
            .expect("first caller left waiting");
        assert!(first.is_err());
        let waiting = tokio::time::timeout(std::time::Duration::from_secs(2), waiting)
            .await
            .expect("second caller left waiting");
        assert!(waiting.is_err());

        // Later lookups see the failure without recomputing
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let late = cache
            .lookup("k", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { 2 }
            })
            .await;
        assert!(late.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
