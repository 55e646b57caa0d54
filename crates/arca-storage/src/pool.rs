//! The one process-wide pool that runs streaming transfers.
//!
//! Each accepted job holds a permit for its whole duration. Jobs submitted while
//! every permit is taken wait in the semaphore queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use arca_core::{ArcaError, ArcaResult};

#[derive(Clone)]
pub struct TransferPool {
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl TransferPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs accepted and not yet finished, queued or running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_saturated(&self) -> bool {
        self.in_flight() >= self.size
    }

    pub fn submit<F>(&self, job: F) -> ArcaResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(ArcaError::Unexpected(
                "transfer pool is shut down".to_string(),
            ));
        }

        let permits = self.permits.clone();
        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!("Transfer pool closed before job started");
                return;
            };
            job.await;
        });
        Ok(())
    }

    /// Stops accepting jobs and waits up to `grace` for running ones.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        tracing::info!(
            in_flight = self.in_flight(),
            grace_secs = grace.as_secs(),
            "Transfer pool shutting down"
        );
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("Transfer pool drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight(),
                    "Transfer pool shutdown grace period elapsed with jobs still running"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn jobs_beyond_pool_size_wait_for_a_worker() {
        let pool = TransferPool::new(1);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit(async move {
            let _ = release_rx.await;
        })
        .unwrap();
        let counter = ran.clone();
        pool.submit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(pool.is_saturated());

        release_tx.send(()).unwrap();
        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = TransferPool::new(2);
        assert!(pool.shutdown(Duration::from_millis(10)).await);
        assert!(pool.submit(async {}).is_err());
    }
}
