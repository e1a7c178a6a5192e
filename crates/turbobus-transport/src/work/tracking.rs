//! In-flight work tracking for graceful worker pool disposal.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::{ThreadingProfile, TransportError, TransportResult};

use super::{Executor, TokioExecutor};

type PendingWork = Arc<RwLock<HashMap<u64, WorkHandle>>>;

/// A tracked unit of submitted work.
#[derive(Debug, Clone)]
pub struct WorkHandle {
    /// Tracking id.
    pub id: u64,
    /// Description given at submission.
    pub description: String,
    /// When the work was submitted.
    pub submitted_at: Instant,
}

/// Removes its work from the pending set exactly once, when dropped.
#[derive(Debug)]
pub struct TrackedWork {
    id: u64,
    pending: PendingWork,
}

impl TrackedWork {
    /// Tracking id.
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for TrackedWork {
    fn drop(&mut self) {
        self.pending.write().remove(&self.id);
    }
}

/// Wraps an executor so every submission is tracked until it finishes.
///
/// Work is tracked from submission: queued, running, rejected, failed or
/// panicking work is removed from the pending set exactly once.
/// [`WorkManager::dispose`] waits for the pending set to drain, bounded by the
/// shutdown timeout, before shutting the executor down.
#[derive(Debug)]
pub struct WorkManager {
    name: String,
    profile: ThreadingProfile,
    executor: Arc<dyn Executor>,
    pending: PendingWork,
    next_id: AtomicU64,
    shutdown_timeout: Duration,
    drain_interval: Duration,
}

impl WorkManager {
    /// Creates a manager over a [`TokioExecutor`] for the profile.
    pub fn new(
        name: impl Into<String>,
        profile: ThreadingProfile,
        shutdown_timeout: Duration,
        drain_interval: Duration,
    ) -> Self {
        let name = name.into();
        let executor = Arc::new(TokioExecutor::new(name.clone(), profile.clone()));
        Self::with_executor(name, profile, executor, shutdown_timeout, drain_interval)
    }

    /// Creates a manager over a caller-supplied executor.
    pub fn with_executor(
        name: impl Into<String>,
        profile: ThreadingProfile,
        executor: Arc<dyn Executor>,
        shutdown_timeout: Duration,
        drain_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            profile,
            executor,
            pending: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            shutdown_timeout,
            drain_interval: drain_interval.max(Duration::from_millis(1)),
        }
    }

    /// Pool name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The threading profile.
    pub const fn profile(&self) -> &ThreadingProfile {
        &self.profile
    }

    /// Starts tracking a unit of work.
    pub fn add_work(&self, description: impl Into<String>) -> TrackedWork {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.write().insert(
            id,
            WorkHandle {
                id,
                description: description.into(),
                submitted_at: Instant::now(),
            },
        );
        TrackedWork {
            id,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Stops tracking a unit of work; returns whether it was tracked.
    pub fn remove_work(&self, id: u64) -> bool {
        self.pending.write().remove(&id).is_some()
    }

    /// Number of tracked work items.
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    /// Snapshot of the tracked work items.
    pub fn pending_work(&self) -> Vec<WorkHandle> {
        self.pending.read().values().cloned().collect()
    }

    /// Runs `work` on the caller's task while tracking it.
    pub async fn do_work<F>(&self, description: &str, work: F) -> F::Output
    where
        F: Future,
    {
        let _tracked = self.add_work(description);
        work.await
    }

    /// Submits work without waiting for it.
    ///
    /// With threading disabled the work runs inline before this returns.
    pub async fn schedule_work<F>(&self, description: &str, work: F) -> TransportResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tracked = self.add_work(description);
        if !self.profile.do_threading {
            let _tracked = tracked;
            work.await;
            return Ok(());
        }
        self.executor.spawn(Box::pin(async move {
            let _tracked = tracked;
            work.await;
        }))
    }

    /// Submits work and waits until a worker has started it.
    pub async fn start_work<F>(&self, description: &str, work: F) -> TransportResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.profile.do_threading {
            return self.schedule_work(description, work).await;
        }

        let tracked = self.add_work(description);
        let (started_tx, started_rx) = oneshot::channel();
        self.executor.spawn(Box::pin(async move {
            let _tracked = tracked;
            let _ = started_tx.send(());
            work.await;
        }))?;

        started_rx.await.map_err(|_| TransportError::WorkRejected {
            pool: self.name.clone(),
            reason: format!("'{description}' was dropped before it started"),
        })
    }

    /// Submits work and waits for its result.
    pub async fn execute<F, T>(&self, description: &str, work: F) -> TransportResult<T>
    where
        F: Future<Output = TransportResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if !self.profile.do_threading {
            return self.do_work(description, work).await;
        }

        let tracked = self.add_work(description);
        let (result_tx, result_rx) = oneshot::channel();
        self.executor.spawn(Box::pin(async move {
            let _tracked = tracked;
            let _ = result_tx.send(work.await);
        }))?;

        result_rx.await.map_err(|_| TransportError::WorkRejected {
            pool: self.name.clone(),
            reason: format!("'{description}' was dropped before completing"),
        })?
    }

    /// Waits for tracked work to drain, up to the shutdown timeout, then shuts
    /// the executor down.
    pub async fn dispose(&self) {
        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            let pending = self.pending_count();
            if pending == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    pool = %self.name,
                    pending,
                    timeout_ms = self.shutdown_timeout.as_millis() as u64,
                    "work still pending after shutdown timeout, forcing shutdown"
                );
                break;
            }
            tokio::time::sleep(self.drain_interval.min(deadline - now)).await;
        }
        self.executor.shutdown();
        debug!(pool = %self.name, "work manager disposed");
    }

    /// Whether the underlying executor is shut down.
    pub fn is_disposed(&self) -> bool {
        self.executor.is_shutdown()
    }
}

impl Executor for WorkManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, work: BoxFuture<'static, ()>) -> TransportResult<()> {
        let tracked = self.add_work("scheduled work");
        self.executor.spawn(Box::pin(async move {
            let _tracked = tracked;
            work.await;
        }))
    }

    fn shutdown(&self) {
        self.executor.shutdown();
    }

    fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }
}
