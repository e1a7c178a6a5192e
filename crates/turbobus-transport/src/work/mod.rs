//! Worker pools and in-flight work tracking.
//!
//! [`Executor`] is the minimal boundary the runtime schedules work through.
//! [`TokioExecutor`] implements it on tokio tasks bounded by a
//! [`ThreadingProfile`](crate::core::ThreadingProfile), and [`WorkManager`]
//! wraps an executor so disposal can wait for in-flight work.

mod executor;
mod tracking;

pub use executor::TokioExecutor;
pub use tracking::{TrackedWork, WorkHandle, WorkManager};

use std::fmt;

use futures::future::BoxFuture;

use crate::core::TransportResult;

/// Runs submitted work asynchronously.
pub trait Executor: Send + Sync + fmt::Debug {
    /// Name used in logs and rejection errors.
    fn name(&self) -> &str;

    /// Submits work; fails if the executor is shut down or its backlog is full.
    ///
    /// Rejected work is dropped without being polled.
    fn spawn(&self, work: BoxFuture<'static, ()>) -> TransportResult<()>;

    /// Rejects further work and aborts everything still queued or running.
    fn shutdown(&self);

    /// Whether [`Executor::shutdown`] has been called.
    fn is_shutdown(&self) -> bool;
}
