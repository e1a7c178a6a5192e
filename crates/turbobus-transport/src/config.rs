//! Connector configuration.
//!
//! A [`ConnectorConfig`] can be loaded from a TOML, YAML or JSON file, with
//! environment variables overriding file settings, or built in code with
//! [`ConnectorConfigBuilder`]. Both paths validate the limits before the
//! config is handed to a connector.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{
    ExhaustedAction, PollingConfig, PoolConfig, PoolExhaustedAction, RetryPolicyConfig,
    ThreadingProfile, TransactedReceiverConfig,
};

/// Default prefix of environment overrides, e.g. `TURBOBUS_POLLING__CONTINUOUS=true`.
pub const ENV_PREFIX: &str = "TURBOBUS";

/// Everything a connector needs besides its transport factories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Worker pool for receiver fan-out and asynchronous reconnects.
    pub receiver_threading: ThreadingProfile,
    /// Worker pool for dispatcher work; sizes the dispatcher pool.
    pub dispatcher_threading: ThreadingProfile,
    /// Worker pool for requester work; sizes the requester pool.
    pub requester_threading: ThreadingProfile,
    /// Dispatcher pool settings
    pub dispatcher_pool: PoolConfig,
    /// Requester pool settings
    pub requester_pool: PoolConfig,
    /// Polling receivers
    pub polling: PollingConfig,
    /// Transacted polling receivers
    pub transacted: TransactedReceiverConfig,
    /// Connector-level retry policy; endpoints may override it.
    pub retry_policy: RetryPolicyConfig,
    /// How long disposal waits for in-flight work.
    pub work_shutdown_timeout: Duration,
    /// How often disposal checks for remaining work.
    pub work_drain_interval: Duration,
    /// Validate the component that caused a reconnect once reconnected.
    pub validate_connections: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            receiver_threading: ThreadingProfile::default(),
            dispatcher_threading: ThreadingProfile::default(),
            requester_threading: ThreadingProfile::default(),
            dispatcher_pool: PoolConfig::default(),
            requester_pool: PoolConfig::default(),
            polling: PollingConfig::default(),
            transacted: TransactedReceiverConfig::default(),
            retry_policy: RetryPolicyConfig::default(),
            work_shutdown_timeout: Duration::from_secs(5),
            work_drain_interval: Duration::from_millis(50),
            validate_connections: true,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConnectorConfig {
    /// Loads a configuration file, with `TURBOBUS_` environment overrides.
    ///
    /// The format follows the extension: `.toml`, `.yaml`/`.yml` or `.json`.
    /// Nested keys use `__`, e.g. `TURBOBUS_RECEIVER_THREADING__MAX_THREADS_ACTIVE=8`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_prefix(path, ENV_PREFIX)
    }

    /// Loads a configuration file with a custom environment prefix.
    pub fn from_file_with_prefix(
        path: impl AsRef<Path>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        use config::{Config, Environment, File, FileFormat};

        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Creates a builder starting from the defaults.
    pub fn builder() -> ConnectorConfigBuilder {
        ConnectorConfigBuilder::new()
    }

    /// Checks that every limit is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (role, profile) in [
            ("receiver", &self.receiver_threading),
            ("dispatcher", &self.dispatcher_threading),
            ("requester", &self.requester_threading),
        ] {
            if profile.max_threads_active == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{role} threading profile needs at least one active thread"
                )));
            }
        }
        for (role, pool) in [
            ("dispatcher", &self.dispatcher_pool),
            ("requester", &self.requester_pool),
        ] {
            if pool.max_active == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "{role} pool max_active must be positive"
                )));
            }
        }
        if !self.polling.continuous && self.polling.frequency.is_zero() {
            return Err(ConfigError::Invalid(
                "polling frequency must be positive".to_string(),
            ));
        }
        if self.transacted.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "transacted receiver concurrency must be positive".to_string(),
            ));
        }

        let retry = &self.retry_policy;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        if retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::Invalid(
                "retry jitter factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Per-key limit of the dispatcher pool.
    pub fn max_dispatchers_active(&self) -> usize {
        self.dispatcher_pool
            .max_active
            .unwrap_or(self.dispatcher_threading.max_threads_active)
    }

    /// Per-key limit of the requester pool.
    pub fn max_requesters_active(&self) -> usize {
        self.requester_pool
            .max_active
            .unwrap_or(self.requester_threading.max_threads_active)
    }
}

/// Programmatic [`ConnectorConfig`] construction.
#[derive(Debug, Default)]
pub struct ConnectorConfigBuilder {
    config: ConnectorConfig,
}

impl ConnectorConfigBuilder {
    /// Starts from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the receiver threading profile.
    #[must_use]
    pub fn receiver_threading(mut self, profile: ThreadingProfile) -> Self {
        self.config.receiver_threading = profile;
        self
    }

    /// Sets the dispatcher threading profile.
    #[must_use]
    pub fn dispatcher_threading(mut self, profile: ThreadingProfile) -> Self {
        self.config.dispatcher_threading = profile;
        self
    }

    /// Sets the requester threading profile.
    #[must_use]
    pub fn requester_threading(mut self, profile: ThreadingProfile) -> Self {
        self.config.requester_threading = profile;
        self
    }

    /// Sets the per-key dispatcher limit.
    #[must_use]
    pub const fn max_dispatchers_active(mut self, max_active: usize) -> Self {
        self.config.dispatcher_pool.max_active = Some(max_active);
        self
    }

    /// Sets the per-key requester limit.
    #[must_use]
    pub const fn max_requesters_active(mut self, max_active: usize) -> Self {
        self.config.requester_pool.max_active = Some(max_active);
        self
    }

    /// Sets what both pools do when a key is exhausted.
    #[must_use]
    pub const fn pool_exhausted_action(
        mut self,
        action: PoolExhaustedAction,
        max_wait: Option<Duration>,
    ) -> Self {
        self.config.dispatcher_pool.exhausted_action = action;
        self.config.dispatcher_pool.max_wait = max_wait;
        self.config.requester_pool.exhausted_action = action;
        self.config.requester_pool.max_wait = max_wait;
        self
    }

    /// Sets what the worker pools do when their backlog is full.
    #[must_use]
    pub fn work_exhausted_action(mut self, action: ExhaustedAction, max_buffer_size: usize) -> Self {
        for profile in [
            &mut self.config.receiver_threading,
            &mut self.config.dispatcher_threading,
            &mut self.config.requester_threading,
        ] {
            profile.exhausted_action = action;
            profile.max_buffer_size = max_buffer_size;
        }
        self
    }

    /// Sets the polling settings.
    #[must_use]
    pub const fn polling(mut self, polling: PollingConfig) -> Self {
        self.config.polling = polling;
        self
    }

    /// Sets the transacted receiver settings.
    #[must_use]
    pub const fn transacted(mut self, transacted: TransactedReceiverConfig) -> Self {
        self.config.transacted = transacted;
        self
    }

    /// Sets the connector retry policy.
    #[must_use]
    pub const fn retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Sets the work drain timeout and check interval used on dispose.
    #[must_use]
    pub const fn work_shutdown(mut self, timeout: Duration, drain_interval: Duration) -> Self {
        self.config.work_shutdown_timeout = timeout;
        self.config.work_drain_interval = drain_interval;
        self
    }

    /// Enables or disables validation of the component behind a reconnect.
    #[must_use]
    pub const fn validate_connections(mut self, validate: bool) -> Self {
        self.config.validate_connections = validate;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ConnectorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_dispatchers_active(), 16);
        assert_eq!(config.work_shutdown_timeout, Duration::from_secs(5));
        assert!(config.validate_connections);
    }

    #[test]
    fn test_builder_overrides_pool_limits() {
        let config = ConnectorConfig::builder()
            .max_dispatchers_active(2)
            .max_requesters_active(3)
            .build()
            .unwrap();
        assert_eq!(config.max_dispatchers_active(), 2);
        assert_eq!(config.max_requesters_active(), 3);
    }

    #[test]
    fn test_builder_rejects_bad_limits() {
        assert!(matches!(
            ConnectorConfig::builder().max_dispatchers_active(0).build(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ConnectorConfig::builder()
                .retry_policy(RetryPolicyConfig::simple(0, Duration::from_millis(10)))
                .build(),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ConnectorConfig::builder()
                .polling(PollingConfig::every(Duration::ZERO))
                .build(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = ConnectorConfig::from_file("/nonexistent/turbobus.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
