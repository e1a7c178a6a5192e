//! Tokio-backed executor bounded by a threading profile.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{ExhaustedAction, ThreadingProfile, TransportError, TransportResult};

use super::Executor;

/// Runs work on tokio tasks, at most `max_threads_active` at a time.
///
/// Work beyond that limit queues; with [`ExhaustedAction::Abort`] and a
/// non-zero `max_buffer_size`, work is rejected once the queue is full.
/// Queued work that waits longer than `thread_wait_timeout` is dropped.
#[derive(Debug)]
pub struct TokioExecutor {
    name: String,
    profile: ThreadingProfile,
    permits: Arc<Semaphore>,
    queued: Arc<AtomicUsize>,
    tasks: Mutex<JoinSet<()>>,
    shutdown: CancellationToken,
}

impl TokioExecutor {
    /// Creates an executor for a threading profile.
    pub fn new(name: impl Into<String>, profile: ThreadingProfile) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(profile.max_threads_active.max(1))),
            profile,
            queued: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(JoinSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// The threading profile.
    pub const fn profile(&self) -> &ThreadingProfile {
        &self.profile
    }

    /// Number of work items waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    /// Number of work items currently running.
    pub fn active(&self) -> usize {
        self.profile
            .max_threads_active
            .max(1)
            .saturating_sub(self.permits.available_permits())
    }

    fn backlog_full(&self) -> bool {
        self.profile.exhausted_action == ExhaustedAction::Abort
            && self.profile.max_buffer_size > 0
            && self.permits.available_permits() == 0
            && self.queued() >= self.profile.max_buffer_size
    }
}

struct QueuedGuard(Arc<AtomicUsize>);

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Executor for TokioExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, work: BoxFuture<'static, ()>) -> TransportResult<()> {
        if self.is_shutdown() {
            return Err(TransportError::WorkRejected {
                pool: self.name.clone(),
                reason: "worker pool is shut down".to_string(),
            });
        }
        if self.backlog_full() {
            return Err(TransportError::WorkRejected {
                pool: self.name.clone(),
                reason: format!(
                    "backlog of {} work items is full",
                    self.profile.max_buffer_size
                ),
            });
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|e| {
            TransportError::WorkRejected {
                pool: self.name.clone(),
                reason: format!("no async runtime available: {e}"),
            }
        })?;

        self.queued.fetch_add(1, Ordering::AcqRel);
        let queued = QueuedGuard(Arc::clone(&self.queued));
        let permits = Arc::clone(&self.permits);
        let shutdown = self.shutdown.clone();
        let wait = self.profile.thread_wait_timeout;
        let name = self.name.clone();

        let task = async move {
            let permit = tokio::select! {
                () = shutdown.cancelled() => return,
                permit = tokio::time::timeout(wait, permits.acquire_owned()) => permit,
            };
            drop(queued);
            match permit {
                Ok(Ok(_permit)) => work.await,
                Ok(Err(_)) => debug!(pool = %name, "worker pool closed before work started"),
                Err(_) => warn!(
                    pool = %name,
                    wait_ms = wait.as_millis() as u64,
                    "work waited too long for a worker and was dropped"
                ),
            }
        };

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(task, &handle);
        Ok(())
    }

    fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.permits.close();
        self.tasks.lock().abort_all();
        debug!(pool = %self.name, "worker pool shut down");
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn profile(max: usize) -> ThreadingProfile {
        ThreadingProfile::with_max_active(max)
    }

    #[tokio::test]
    async fn test_runs_submitted_work() {
        let executor = TokioExecutor::new("test", profile(2));
        let done = Arc::new(Notify::new());
        let signal = done.clone();
        executor
            .spawn(Box::pin(async move { signal.notify_one() }))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), done.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let executor = TokioExecutor::new("test", profile(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            executor
                .spawn(Box::pin(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abort_rejects_when_backlog_full() {
        let executor = TokioExecutor::new(
            "test",
            ThreadingProfile {
                max_threads_active: 1,
                max_buffer_size: 1,
                exhausted_action: ExhaustedAction::Abort,
                ..ThreadingProfile::default()
            },
        );
        let gate = Arc::new(Notify::new());

        let blocker = gate.clone();
        executor
            .spawn(Box::pin(async move { blocker.notified().await }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        executor.spawn(Box::pin(async {})).unwrap();
        let rejected = executor.spawn(Box::pin(async {}));
        assert!(matches!(rejected, Err(TransportError::WorkRejected { .. })));

        gate.notify_one();
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let executor = TokioExecutor::new("test", profile(1));
        executor.shutdown();
        assert!(executor.is_shutdown());
        assert!(executor.spawn(Box::pin(async {})).is_err());
    }
}
