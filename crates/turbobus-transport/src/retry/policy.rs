//! Retry policies and the templates that create them.

use std::sync::Arc;
use std::time::Duration;

use crate::core::{RetryPolicyConfig, RetryPolicyKind, TransportError};

use super::{RetryNotifier, RetryPolicyTemplate};

/// Outcome of applying a policy to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyStatus {
    /// Try again after the delay.
    Retry(Duration),
    /// Attempts are used up.
    Exhausted,
    /// The failure must not be retried; propagate it unchanged.
    Fatal,
}

/// Stateful policy for one retry execution.
pub trait RetryPolicy: Send {
    /// Decides what to do after a failed attempt.
    fn apply_policy(&mut self, failure: &TransportError) -> PolicyStatus;
}

/// Runs once and never retries.
#[derive(Debug, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn apply_policy(&mut self, _failure: &TransportError) -> PolicyStatus {
        PolicyStatus::Fatal
    }
}

/// Retries retryable failures up to a fixed number of attempts.
#[derive(Debug)]
pub struct SimpleRetryPolicy {
    config: RetryPolicyConfig,
    failures: u32,
}

impl SimpleRetryPolicy {
    /// Creates a policy from its configuration.
    pub const fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn apply_policy(&mut self, failure: &TransportError) -> PolicyStatus {
        if failure.is_fatal() {
            return PolicyStatus::Fatal;
        }
        self.failures = self.failures.saturating_add(1);
        let unbounded = matches!(self.config.kind, RetryPolicyKind::Forever);
        if !unbounded && self.failures >= self.config.max_attempts.max(1) {
            return PolicyStatus::Exhausted;
        }
        PolicyStatus::Retry(self.config.calculate_delay(self.failures))
    }
}

/// Template for [`NoRetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct NoRetryPolicyTemplate {
    notifier: Option<Arc<dyn RetryNotifier>>,
}

impl NoRetryPolicyTemplate {
    /// Creates the template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn RetryNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl RetryPolicyTemplate for NoRetryPolicyTemplate {
    fn create_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(NoRetryPolicy)
    }

    fn notifier(&self) -> Option<&Arc<dyn RetryNotifier>> {
        self.notifier.as_ref()
    }

    fn is_no_retry(&self) -> bool {
        true
    }
}

/// Template for [`SimpleRetryPolicy`], covering the simple and forever kinds.
#[derive(Debug, Clone)]
pub struct SimpleRetryPolicyTemplate {
    config: RetryPolicyConfig,
    notifier: Option<Arc<dyn RetryNotifier>>,
}

impl SimpleRetryPolicyTemplate {
    /// Creates the template.
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            notifier: None,
        }
    }

    /// Attaches a notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn RetryNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// The policy configuration.
    pub const fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }
}

impl RetryPolicyTemplate for SimpleRetryPolicyTemplate {
    fn create_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(SimpleRetryPolicy::new(self.config.clone()))
    }

    fn notifier(&self) -> Option<&Arc<dyn RetryNotifier>> {
        self.notifier.as_ref()
    }

    fn is_synchronous(&self) -> bool {
        !self.config.asynchronous
    }
}

/// Builds the template for a policy configuration.
pub fn template_for(
    config: &RetryPolicyConfig,
    notifier: Option<Arc<dyn RetryNotifier>>,
) -> Arc<dyn RetryPolicyTemplate> {
    match config.kind {
        RetryPolicyKind::NoRetry => {
            let mut template = NoRetryPolicyTemplate::new();
            template.notifier = notifier;
            Arc::new(template)
        }
        RetryPolicyKind::Simple | RetryPolicyKind::Forever => {
            let mut template = SimpleRetryPolicyTemplate::new(config.clone());
            template.notifier = notifier;
            Arc::new(template)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_retry_is_always_fatal() {
        let mut policy = NoRetryPolicy;
        assert_eq!(
            policy.apply_policy(&TransportError::connect("refused")),
            PolicyStatus::Fatal
        );
    }

    #[test]
    fn test_simple_policy_exhausts_after_max_attempts() {
        let mut policy =
            SimpleRetryPolicy::new(RetryPolicyConfig::simple(3, Duration::from_millis(10)));
        let err = TransportError::connect("refused");
        assert_eq!(
            policy.apply_policy(&err),
            PolicyStatus::Retry(Duration::from_millis(10))
        );
        assert_eq!(
            policy.apply_policy(&err),
            PolicyStatus::Retry(Duration::from_millis(10))
        );
        assert_eq!(policy.apply_policy(&err), PolicyStatus::Exhausted);
    }

    #[test]
    fn test_simple_policy_does_not_retry_fatal_errors() {
        let mut policy =
            SimpleRetryPolicy::new(RetryPolicyConfig::simple(5, Duration::from_millis(10)));
        assert_eq!(
            policy.apply_policy(&TransportError::FatalConnect("bad password".into())),
            PolicyStatus::Fatal
        );
    }

    #[test]
    fn test_forever_policy_never_exhausts() {
        let mut policy =
            SimpleRetryPolicy::new(RetryPolicyConfig::forever(Duration::from_millis(1)));
        let err = TransportError::connect("refused");
        for _ in 0..1000 {
            assert!(matches!(policy.apply_policy(&err), PolicyStatus::Retry(_)));
        }
    }

    #[test]
    fn test_template_for_kind() {
        assert!(template_for(&RetryPolicyConfig::no_retry(), None).is_no_retry());

        let template = template_for(
            &RetryPolicyConfig::simple(2, Duration::from_millis(5)).asynchronous(),
            None,
        );
        assert!(!template.is_no_retry());
        assert!(!template.is_synchronous());
    }
}
