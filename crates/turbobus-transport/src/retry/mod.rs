//! Retry engine for connect attempts.
//!
//! A [`RetryPolicyTemplate`] runs a [`RetryCallback`] until it marks its
//! [`RetryContext`] ok, the policy gives up, or the failure is fatal:
//!
//! - **NoRetry**: run once, propagate the failure unchanged
//! - **Simple**: up to N attempts with fixed or exponential backoff, then
//!   [`TransportError::RetryExhausted`]
//! - **Forever**: Simple without an attempt limit
//!
//! Asynchronous templates hand the attempt loop to an [`Executor`] and return
//! a context that is not yet ok.

mod context;
mod notifier;
mod policy;

pub use context::{FAILED_COMPONENT_KEY, RetryContext};
pub use notifier::ConnectNotifier;
pub use policy::{
    NoRetryPolicy, NoRetryPolicyTemplate, PolicyStatus, RetryPolicy, SimpleRetryPolicy,
    SimpleRetryPolicyTemplate, template_for,
};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::core::{TransportError, TransportResult};
use crate::work::Executor;

/// Work executed under a retry template.
#[async_trait]
pub trait RetryCallback: Send + Sync {
    /// Performs one attempt; must call [`RetryContext::set_ok`] on success.
    async fn do_work(&self, context: &mut RetryContext) -> TransportResult<()>;

    /// Describes the work for logs and errors.
    fn work_description(&self) -> String;

    /// Called once when the template gives up on the work.
    fn on_give_up(&self, failure: &TransportError) {
        let _ = failure;
    }
}

/// Observes the final outcome of a retry execution.
pub trait RetryNotifier: Send + Sync + fmt::Debug {
    /// Called once when the work succeeds.
    fn on_success(&self, context: &RetryContext);

    /// Called once when the template gives up.
    fn on_failure(&self, context: &RetryContext);
}

/// Creates policies and runs work under them.
#[async_trait]
pub trait RetryPolicyTemplate: Send + Sync + fmt::Debug {
    /// Creates a fresh policy for one execution.
    fn create_policy(&self) -> Box<dyn RetryPolicy>;

    /// The notifier informed of the outcome, if any.
    fn notifier(&self) -> Option<&Arc<dyn RetryNotifier>>;

    /// Whether the attempt loop runs on the caller.
    fn is_synchronous(&self) -> bool {
        true
    }

    /// Whether this template never retries.
    fn is_no_retry(&self) -> bool {
        false
    }

    /// Runs `callback` with a fresh context.
    async fn execute(
        &self,
        callback: Arc<dyn RetryCallback>,
        executor: Option<Arc<dyn Executor>>,
    ) -> TransportResult<RetryContext> {
        let context = RetryContext::new(callback.work_description());
        self.execute_with_context(callback, context, executor).await
    }

    /// Runs `callback` with a caller-prepared context.
    ///
    /// Synchronous templates return the successful context or the final
    /// error. Asynchronous templates require an executor and return the
    /// context immediately, before any attempt has completed.
    async fn execute_with_context(
        &self,
        callback: Arc<dyn RetryCallback>,
        context: RetryContext,
        executor: Option<Arc<dyn Executor>>,
    ) -> TransportResult<RetryContext> {
        let policy = self.create_policy();
        let notifier = self.notifier().cloned();

        if self.is_synchronous() {
            let mut context = context;
            run_attempts(policy, notifier, callback.as_ref(), &mut context).await?;
            return Ok(context);
        }

        let Some(executor) = executor else {
            return Err(TransportError::FatalConnect(format!(
                "asynchronous retry of {} requires a worker pool",
                context.description()
            )));
        };

        let pending = context.clone();
        executor.spawn(Box::pin(async move {
            let mut context = context;
            let _ = run_attempts(policy, notifier, callback.as_ref(), &mut context).await;
        }))?;
        Ok(pending)
    }
}

async fn run_attempts(
    mut policy: Box<dyn RetryPolicy>,
    notifier: Option<Arc<dyn RetryNotifier>>,
    callback: &dyn RetryCallback,
    context: &mut RetryContext,
) -> TransportResult<()> {
    loop {
        let attempt = context.begin_attempt();
        match callback.do_work(context).await {
            Ok(()) if context.is_ok() => {
                if let Some(notifier) = &notifier {
                    notifier.on_success(context);
                }
                return Ok(());
            }
            Ok(()) => context.set_failed(TransportError::connect(format!(
                "{} did not complete",
                context.description()
            ))),
            Err(e) => context.set_failed(e),
        }

        let failure = context
            .last_failure()
            .cloned()
            .unwrap_or_else(|| TransportError::Internal("attempt failed without a cause".into()));

        match policy.apply_policy(&failure) {
            PolicyStatus::Retry(delay) => {
                debug!(
                    work = %context.description(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            PolicyStatus::Fatal => {
                callback.on_give_up(&failure);
                if let Some(notifier) = &notifier {
                    notifier.on_failure(context);
                }
                return Err(failure);
            }
            PolicyStatus::Exhausted => {
                error!(
                    work = %context.description(),
                    attempts = attempt,
                    error = %failure,
                    "retry policy exhausted"
                );
                callback.on_give_up(&failure);
                if let Some(notifier) = &notifier {
                    notifier.on_failure(context);
                }
                return Err(TransportError::RetryExhausted {
                    description: context.description().to_string(),
                    attempts: attempt,
                    last_failure: Box::new(failure),
                });
            }
        }
    }
}
