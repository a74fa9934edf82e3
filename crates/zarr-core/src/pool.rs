//! Bounded worker pool for native reads and chunk encoding.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Result, ZarrError};

/// Limits how many native reads and encode jobs run at once.
///
/// Async reads hold a permit for their duration; CPU-bound work runs on the
/// blocking thread pool while holding a permit, keeping it off the reactor.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Run an async job once a permit is available.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ZarrError::internal("worker pool closed"))?;
        job.await
    }

    /// Run a CPU-bound job on the blocking pool once a permit is available.
    pub async fn run_blocking<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ZarrError::internal("worker pool closed"))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| ZarrError::internal(format!("blocking task failed: {}", e)))?
    }

    /// Configured number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs = (0..8).map(|_| {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            tokio::spawn(async move {
                pool.run(async {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            })
        });

        for job in futures::future::join_all(jobs).await {
            job.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_result() {
        let pool = WorkerPool::new(1);
        let sum = pool
            .run_blocking(|| Ok((1..=10u64).sum::<u64>()))
            .await
            .unwrap();
        assert_eq!(sum, 55);

        let err = pool
            .run_blocking(|| -> Result<()> { Err(ZarrError::internal("encode failed")) })
            .await
            .unwrap_err();
        assert!(matches!(err, ZarrError::Internal(_)));
    }
}
