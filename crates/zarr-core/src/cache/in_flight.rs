//! Registry of in-flight computations, at most one per key.
//!
//! The first caller for a key spawns the computation as a tokio task and
//! registers a shared handle to its result; later callers await the same
//! handle. The task runs to completion even if every waiter goes away, and
//! removes its own registry entry when done.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error};

use super::shard_index;
use crate::error::{Result, ZarrError};

/// Awaitable result shared by every caller of one key.
pub type SharedResult<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Pending<V: Clone> {
    id: u64,
    result: SharedResult<V>,
}

/// Sharded map from key to the shared result of its running computation.
pub struct InFlight<K, V: Clone> {
    shards: Vec<Mutex<HashMap<K, Pending<V>>>>,
    next_id: AtomicU64,
}

impl<K, V> InFlight<K, V>
where
    K: Hash + Eq + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1)).map(|_| Mutex::new(HashMap::new())).collect(),
            next_id: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &K) -> MutexGuard<'_, HashMap<K, Pending<V>>> {
        let shard = &self.shards[shard_index(key, self.shards.len())];
        // the map stays consistent even if a holder panicked
        shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join the computation for `key`, starting it with `start` if none is
    /// running.
    ///
    /// Returns the shared result and whether this call started it.
    pub fn join<F, Fut>(self: &Arc<Self>, key: K, start: F) -> (SharedResult<V>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut shard = self.shard(&key);
        if let Some(pending) = shard.get(&key) {
            debug!(?key, "Joining in-flight computation");
            return (pending.result.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(self);
        let task_key = key.clone();
        let work = start();
        let handle = tokio::spawn(async move {
            let result = work.await;
            registry.complete(&task_key, id);
            result
        });

        let result = handle
            .map(|joined| match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "In-flight task failed");
                    Err(ZarrError::internal(format!("in-flight task failed: {}", e)))
                }
            })
            .boxed()
            .shared();

        shard.insert(
            key,
            Pending {
                id,
                result: result.clone(),
            },
        );
        (result, true)
    }

    fn complete(&self, key: &K, id: u64) {
        let mut shard = self.shard(key);
        if shard.get(key).map(|p| p.id) == Some(id) {
            shard.remove(key);
        }
    }

    /// Detach every entry whose key matches `predicate`.
    ///
    /// Current waiters still receive their result; later callers start a
    /// fresh computation. Returns the number of entries detached.
    pub fn forget<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = shard.len();
            shard.retain(|key, _| !predicate(key));
            removed += before - shard.len();
        }
        removed
    }

    /// Number of computations currently registered.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().map(|s| s.len()).unwrap_or(0))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let registry: Arc<InFlight<u32, u64>> = Arc::new(InFlight::new(4));
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                let (result, _) = registry.join(7, move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(42)
                });
                result.await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_entry_removed_after_completion() {
        let registry: Arc<InFlight<u32, u64>> = Arc::new(InFlight::new(2));
        let (result, started) = registry.join(1, || async { Ok(5) });
        assert!(started);
        assert_eq!(result.await.unwrap(), 5);

        // the task removes its entry after producing the result
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.is_empty());

        let (_, started) = registry.join(1, || async { Ok(6) });
        assert!(started);
    }

    #[tokio::test]
    async fn test_errors_are_shared_not_retained() {
        let registry: Arc<InFlight<u32, u64>> = Arc::new(InFlight::new(2));
        let (result, _) = registry.join(3, || async {
            Err(ZarrError::upstream("repository offline"))
        });
        assert!(matches!(
            result.await,
            Err(ZarrError::UpstreamReadFailure(_))
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let (result, started) = registry.join(3, || async { Ok(1) });
        assert!(started);
        assert_eq!(result.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_task_completes_without_waiters() {
        let registry: Arc<InFlight<u32, u64>> = Arc::new(InFlight::new(2));
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();

        let (result, _) = registry.join(9, move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        drop(result);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_forget_detaches_matching_keys() {
        let registry: Arc<InFlight<u32, u64>> = Arc::new(InFlight::new(2));
        let (slow, _) = registry.join(1, || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let (_other, _) = registry.join(2, || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(2)
        });

        assert_eq!(registry.forget(|key| *key == 1), 1);
        let (fresh, started) = registry.join(1, || async { Ok(10) });
        assert!(started);
        assert_eq!(fresh.await.unwrap(), 10);
        assert_eq!(slow.await.unwrap(), 1);
    }
}
