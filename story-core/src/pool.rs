//! Fixed-size worker pool.
//!
//! `submit` waits for a free slot before spawning, so a saturated pool
//! pushes back on the caller (the accept loop) instead of queueing or
//! rejecting work.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,
}

/// Runs at most `size` tasks at once.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` slots (at least one).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of tasks currently running.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Run `task` on the pool, waiting for a free slot first.
    ///
    /// Fails only once the pool has been closed, including while waiting.
    pub async fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        self.tracker.spawn(async move {
            let _permit = permit;
            task.await;
        });
        Ok(())
    }

    /// Stop accepting submissions. Running tasks are not interrupted.
    pub fn close(&self) {
        self.slots.close();
        self.tracker.close();
    }

    /// Close the pool and wait for every running task to finish.
    pub async fn shutdown(&self) {
        self.close();
        self.tracker.wait().await;
    }
}
