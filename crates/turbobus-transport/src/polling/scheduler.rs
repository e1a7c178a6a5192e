//! Fixed-delay task scheduler.
//!
//! Each scheduled task runs on its own tokio task: the next run is scheduled
//! relative to the end of the previous one, so runs of one task never overlap.
//! Cancelling a task only interrupts its sleeps; a run in progress completes.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Periodic scheduler owned by a connector.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    token: CancellationToken,
}

impl Scheduler {
    /// Creates a running scheduler.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
        }
    }

    /// Scheduler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `task` after `initial_delay`, then again `delay` after each run completes.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        name: impl Into<String>,
        initial_delay: Duration,
        delay: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();
        let cancelled = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            if !sleep_or_cancel(&cancelled, initial_delay).await {
                return;
            }
            loop {
                trace!(task = %task_name, "running scheduled task");
                task().await;
                if !sleep_or_cancel(&cancelled, delay).await {
                    break;
                }
            }
            debug!(task = %task_name, "scheduled task cancelled");
        });

        ScheduledTask {
            name,
            token,
            handle,
        }
    }

    /// Runs `task` back-to-back, yielding between runs, until cancelled.
    pub fn schedule_continuous<F, Fut>(
        &self,
        name: impl Into<String>,
        initial_delay: Duration,
        task: F,
    ) -> ScheduledTask
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();
        let cancelled = token.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            if !sleep_or_cancel(&cancelled, initial_delay).await {
                return;
            }
            while !cancelled.is_cancelled() {
                task().await;
                tokio::task::yield_now().await;
            }
            debug!(task = %task_name, "continuous task cancelled");
        });

        ScheduledTask {
            name,
            token,
            handle,
        }
    }

    /// Cancels every task scheduled on this scheduler.
    pub fn shutdown(&self) {
        if !self.token.is_cancelled() {
            debug!(scheduler = %self.name, "shutting down scheduler");
            self.token.cancel();
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Returns false when cancelled before `delay` elapsed.
async fn sleep_or_cancel(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Handle to a scheduled task.
#[derive(Debug)]
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancels future runs; a run in progress completes.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancels and waits for a run in progress to complete.
    pub async fn cancel_and_wait(self) {
        self.token.cancel();
        let _ = self.handle.await;
    }
}
