// Bounded task pool shared by query fan-out and background jobs.
//
// `run_all` is a join barrier: every task runs (at most `max_concurrent` at a time) and the
// results come back in input order. `submit` is fire-and-forget, but the task is tracked so
// `shutdown` can drain it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    background: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl WorkerPool {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            background: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Runs every task and waits for all of them. A panicking task fails the whole batch.
    pub async fn run_all<F, T>(&self, tasks: Vec<F>) -> anyhow::Result<Vec<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut set = JoinSet::new();
        let total = tasks.len();
        for (index, task) in tasks.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (index, task.await)
            });
        }
        let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            let (index, value) = joined.map_err(|e| anyhow::anyhow!("pool task failed: {}", e))?;
            results[index] = Some(value);
        }
        results
            .into_iter()
            .map(|r| r.ok_or_else(|| anyhow::anyhow!("pool task produced no result")))
            .collect()
    }

    /// Queues a background task. Failures are logged, never propagated.
    pub async fn submit<F>(&self, name: &'static str, task: F) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        anyhow::ensure!(
            !self.closed.load(Ordering::Acquire),
            "worker pool is shut down, rejected {}",
            name
        );
        let permits = Arc::clone(&self.permits);
        let mut background = self.background.lock().await;
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            let _permit = permits.acquire_owned().await;
            match task.await {
                Ok(()) => tracing::debug!(task = name, "background task complete"),
                Err(e) => tracing::warn!(task = name, error = %e, "background task failed"),
            }
        });
        Ok(())
    }

    /// Stops accepting background tasks and waits for the queued ones to finish.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut background = self.background.lock().await;
        while let Some(joined) = background.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "background task aborted");
            }
        }
    }
}
