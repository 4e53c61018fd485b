//! Cached derived values with single-flight computation
//!
//! Each key moves `Absent -> Pending -> Resolved` exactly once. The first
//! request starts the computation on the runtime; every later request, whether
//! it arrives while pending or after, observes that one outcome. Failures are
//! resolutions too and are never retried.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::DeriveError;

/// Result of one derivation
pub type Derived<V> = Result<V, DeriveError>;

/// Non-blocking view of a cache entry
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Pending,
    Resolved(Derived<V>),
}

type Slot<V> = watch::Receiver<Option<Derived<V>>>;

pub struct DerivedCache<K, V> {
    handle: Handle,
    slots: Mutex<HashMap<K, Slot<V>>>,
    started: AtomicUsize,
}

impl<K, V> DerivedCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Computations are spawned onto `handle`
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            slots: Mutex::new(HashMap::new()),
            started: AtomicUsize::new(0),
        }
    }

    /// The entry for `key`, starting `compute` if there is none yet.
    ///
    /// Only the insertion is done under the lock; whoever inserts owns the
    /// computation.
    fn slot<F, Fut>(&self, key: &K, compute: F) -> Slot<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Derived<V>> + Send + 'static,
    {
        let tx = {
            let mut slots = self.slots.lock();
            if let Some(rx) = slots.get(key) {
                return rx.clone();
            }
            let (tx, rx) = watch::channel(None);
            slots.insert(key.clone(), rx);
            tx
        };
        let rx = tx.subscribe();

        self.started.fetch_add(1, Ordering::SeqCst);
        debug!(key = ?key, "derivation started");
        let job = self.handle.spawn(compute());
        let key = key.clone();
        self.handle.spawn(async move {
            let outcome = match job.await {
                Ok(outcome) => outcome,
                Err(e) => Err(DeriveError::Aborted(e.to_string())),
            };
            if let Err(e) = &outcome {
                warn!(key = ?key, error = %e, "derivation failed");
            }
            tx.send_replace(Some(outcome));
        });
        rx
    }

    /// Outcome for `key`, computing it at most once across all callers
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> Derived<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Derived<V>> + Send + 'static,
    {
        let mut rx = self.slot(&key, compute);
        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        resolved.unwrap_or_else(|| Err(DeriveError::Aborted("result channel closed".to_string())))
    }

    /// Like [`get`](Self::get) but never waits: starts the computation if
    /// needed and reports `Pending` until it resolves.
    pub fn poll<F, Fut>(&self, key: K, compute: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Derived<V>> + Send + 'static,
    {
        Self::view(&self.slot(&key, compute))
    }

    /// Current state of `key` without starting anything; `None` when absent
    pub fn peek(&self, key: &K) -> Option<Lookup<V>> {
        self.slots.lock().get(key).map(Self::view)
    }

    fn view(rx: &Slot<V>) -> Lookup<V> {
        match &*rx.borrow() {
            Some(outcome) => Lookup::Resolved(outcome.clone()),
            None if rx.has_changed().is_err() => Lookup::Resolved(Err(DeriveError::Aborted(
                "result channel closed".to_string(),
            ))),
            None => Lookup::Pending,
        }
    }

    /// Number of computations ever started
    pub fn computations(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry. Running computations finish but their results are dropped.
    pub fn clear(&self) {
        self.slots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn cache() -> Arc<DerivedCache<u32, String>> {
        Arc::new(DerivedCache::new(Handle::current()))
    }

    #[tokio::test]
    async fn test_get_computes_once() {
        let cache = cache();
        let first = cache.get(1, || async { Ok("one".to_string()) }).await;
        let second = cache.get(1, || async { Ok("other".to_string()) }).await;
        assert_eq!(first.unwrap(), "one");
        assert_eq!(second.unwrap(), "one");
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_separately() {
        let cache = cache();
        cache.get(1, || async { Ok("a".to_string()) }).await.unwrap();
        cache.get(2, || async { Ok("b".to_string()) }).await.unwrap();
        assert_eq!(cache.computations(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_sticky() {
        let cache = cache();
        let err = cache
            .get(7, || async { Err(DeriveError::EmptyCommand) })
            .await
            .unwrap_err();
        assert_eq!(err, DeriveError::EmptyCommand);
        let again = cache.get(7, || async { Ok("recovered".to_string()) }).await;
        assert_eq!(again.unwrap_err(), DeriveError::EmptyCommand);
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_poll_reports_pending_then_resolved() {
        let cache = cache();
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let state = cache.poll(3, move || async move {
            let _ = gate.await;
            Ok("done".to_string())
        });
        assert_eq!(state, Lookup::Pending);
        assert_eq!(cache.peek(&3), Some(Lookup::Pending));

        release.send(()).unwrap();
        let value = cache.get(3, || async { Ok("never".to_string()) }).await;
        assert_eq!(value.unwrap(), "done");
        assert_eq!(cache.peek(&3), Some(Lookup::Resolved(Ok("done".to_string()))));
        assert_eq!(cache.computations(), 1);
    }

    #[tokio::test]
    async fn test_peek_absent() {
        let cache = cache();
        assert_eq!(cache.peek(&9), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_computation_resolves_to_error() {
        let cache = cache();
        let outcome = cache
            .get(5, || async {
                if true {
                    panic!("boom");
                }
                Ok("unreachable".to_string())
            })
            .await;
        assert!(matches!(outcome, Err(DeriveError::Aborted(_))));
        let again = cache.get(5, || async { Ok("retry".to_string()) }).await;
        assert!(matches!(again, Err(DeriveError::Aborted(_))));
    }

    #[tokio::test]
    async fn test_clear_allows_recompute() {
        let cache = cache();
        cache.get(1, || async { Ok("a".to_string()) }).await.unwrap();
        cache.clear();
        let value = cache.get(1, || async { Ok("b".to_string()) }).await;
        assert_eq!(value.unwrap(), "b");
        assert_eq!(cache.computations(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_single_flight() {
        let cache = cache();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let runs = Arc::clone(&runs);
            tasks.push(tokio::spawn(async move {
                cache
                    .get(42, move || async move {
                        let n = runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(format!("token-{}", n))
                    })
                    .await
            }));
        }
        let mut seen = Vec::new();
        for task in tasks {
            seen.push(task.await.unwrap().unwrap());
        }
        assert!(seen.iter().all(|t| t == "token-0"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.computations(), 1);
    }
}
