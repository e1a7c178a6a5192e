//! Runtime configuration types shared by connectors and transports.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a worker pool does when its backlog is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedAction {
    /// Queue the work until a worker frees up.
    #[default]
    Wait,
    /// Reject the work.
    Abort,
}

/// Sizing and exhaustion settings of one worker pool role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadingProfile {
    /// Maximum number of work items running concurrently.
    pub max_threads_active: usize,

    /// Maximum number of queued work items before the exhaustion action applies.
    /// `0` = unbounded
    pub max_buffer_size: usize,

    /// Behaviour when the backlog is full.
    pub exhausted_action: ExhaustedAction,

    /// When false, submitted work runs inline on the caller's task.
    pub do_threading: bool,

    /// Prefix used for the pool name in logs.
    pub thread_name_prefix: String,

    /// How long queued work waits for a worker before being rejected.
    pub thread_wait_timeout: Duration,
}

impl Default for ThreadingProfile {
    fn default() -> Self {
        Self {
            max_threads_active: 16,
            max_buffer_size: 0,
            exhausted_action: ExhaustedAction::Wait,
            do_threading: true,
            thread_name_prefix: "turbobus".to_string(),
            thread_wait_timeout: Duration::from_secs(30),
        }
    }
}

impl ThreadingProfile {
    /// A profile with the given concurrency and default settings otherwise.
    #[must_use]
    pub fn with_max_active(max_threads_active: usize) -> Self {
        Self {
            max_threads_active,
            ..Self::default()
        }
    }

    /// A profile that runs all work inline.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            do_threading: false,
            ..Self::default()
        }
    }
}

/// What a keyed pool does when a key has no free instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PoolExhaustedAction {
    /// Wait for an instance to be returned.
    #[default]
    Block,
    /// Fail immediately.
    Fail,
}

/// Settings for a dispatcher or requester pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PoolConfig {
    /// Behaviour when a key is exhausted.
    pub exhausted_action: PoolExhaustedAction,

    /// Maximum time a blocked borrow waits.
    /// `None` = wait indefinitely
    pub max_wait: Option<Duration>,

    /// Overrides the per-key maximum that is otherwise taken from the role's
    /// threading profile.
    pub max_active: Option<usize>,
}

/// Fixed-delay polling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Delay between the end of one poll and the start of the next.
    pub frequency: Duration,

    /// Delay before the first poll.
    pub start_delay: Duration,

    /// Poll back-to-back instead of on a fixed delay.
    pub continuous: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            frequency: Duration::from_millis(1000),
            start_delay: Duration::from_millis(1000),
            continuous: false,
        }
    }
}

impl PollingConfig {
    /// Polling on the given frequency, starting immediately.
    #[must_use]
    pub const fn every(frequency: Duration) -> Self {
        Self {
            frequency,
            start_delay: Duration::ZERO,
            continuous: false,
        }
    }
}

/// Settings of transacted polling receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactedReceiverConfig {
    /// Run several pollers for one transacted endpoint.
    pub multiple_receivers: bool,

    /// Number of pollers when multiple receivers are enabled.
    pub concurrency: usize,

    /// Run the whole batch inside one transaction instead of one per message.
    pub receive_in_transaction: bool,
}

impl Default for TransactedReceiverConfig {
    fn default() -> Self {
        Self {
            multiple_receivers: true,
            concurrency: 4,
            receive_in_transaction: true,
        }
    }
}

/// Built-in retry policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyKind {
    /// Run once.
    #[default]
    NoRetry,
    /// Up to `max_attempts` attempts.
    Simple,
    /// Unbounded attempts.
    Forever,
}

/// Configuration of the retry policy governing connect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Policy kind
    pub kind: RetryPolicyKind,
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub frequency: Duration,
    /// Exponential backoff multiplier; `1.0` gives a fixed delay
    pub backoff_multiplier: f64,
    /// Upper bound for the delay
    pub max_delay: Duration,
    /// Jitter factor (0.0 - 1.0)
    pub jitter_factor: f64,
    /// Run the attempt loop on a worker instead of the caller
    pub asynchronous: bool,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicyConfig {
    /// Run once and propagate the failure.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            kind: RetryPolicyKind::NoRetry,
            max_attempts: 1,
            frequency: Duration::from_millis(2000),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            asynchronous: false,
        }
    }

    /// Up to `max_attempts` attempts with a fixed delay.
    #[must_use]
    pub const fn simple(max_attempts: u32, frequency: Duration) -> Self {
        Self {
            kind: RetryPolicyKind::Simple,
            max_attempts,
            frequency,
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            asynchronous: false,
        }
    }

    /// Retry until success with a fixed delay.
    #[must_use]
    pub const fn forever(frequency: Duration) -> Self {
        Self {
            kind: RetryPolicyKind::Forever,
            max_attempts: u32::MAX,
            frequency,
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            asynchronous: false,
        }
    }

    /// Uses exponential backoff capped at `max_delay`.
    #[must_use]
    pub const fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_delay = max_delay;
        self
    }

    /// Adds jitter to each delay.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Runs the attempt loop asynchronously.
    #[must_use]
    pub const fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    /// Whether this is the no-retry policy.
    pub const fn is_no_retry(&self) -> bool {
        matches!(self.kind, RetryPolicyKind::NoRetry)
    }

    /// Calculates the delay after the given failed attempt (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.frequency.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay_ms = self.frequency.as_millis() as f64 * self.backoff_multiplier.powi(exponent);

        let jitter = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.jitter_factor;
        let jittered_delay_ms = delay_ms * jitter;

        let capped_delay_ms = jittered_delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay_ms as u64)
    }
}
