//! Transport error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::LifecycleState;

/// A specialized `Result` type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Identifies the sub-resource of a connector whose connection failed.
///
/// Carried on connect-class errors and stashed into the retry context so a
/// successful reconnect can re-validate the specific component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum FailedComponent {
    /// The connector itself.
    Connector(String),
    /// A receiver, identified by its receiver key.
    Receiver(String),
    /// A pooled dispatcher, identified by its endpoint key.
    Dispatcher(String),
    /// A pooled requester, identified by its endpoint key.
    Requester(String),
}

impl FailedComponent {
    /// The registry or pool key of the component.
    pub fn key(&self) -> &str {
        match self {
            Self::Connector(key)
            | Self::Receiver(key)
            | Self::Dispatcher(key)
            | Self::Requester(key) => key,
        }
    }
}

impl fmt::Display for FailedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connector(name) => write!(f, "connector '{name}'"),
            Self::Receiver(key) => write!(f, "receiver '{key}'"),
            Self::Dispatcher(key) => write!(f, "dispatcher '{key}'"),
            Self::Requester(key) => write!(f, "requester '{key}'"),
        }
    }
}

/// Coarse classification of a [`TransportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    /// Retryable connection failure.
    Connect,
    /// Connection failure that must not be retried.
    FatalConnect,
    /// A retry policy gave up.
    RetryExhausted,
    /// Illegal lifecycle transition or use after dispose.
    Lifecycle,
    /// Pool exhausted or a pooled instance failed validation.
    Pool,
    /// Dispatch, send or request failed.
    Dispatch,
    /// Invalid registration or configuration.
    Configuration,
    /// Work submission was rejected or interrupted.
    Work,
    /// Transaction begin, commit or rollback failed.
    Transaction,
    /// Operation timed out.
    Timeout,
    /// I/O or serialization failure.
    Io,
    /// Anything else.
    Internal,
}

/// Represents errors that can occur in the transport runtime.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// A retryable connection failure.
    #[error("Connect failed: {message}")]
    Connect {
        /// Description of the failure
        message: String,
        /// The sub-resource that failed, if known
        component: Option<FailedComponent>,
    },

    /// A connection failure that must not be retried.
    #[error("Fatal connect error: {0}")]
    FatalConnect(String),

    /// The retry policy ran out of attempts.
    #[error("Retry exhausted after {attempts} attempt(s) for {description}: {last_failure}")]
    RetryExhausted {
        /// Description of the retried work
        description: String,
        /// Number of attempts made
        attempts: u32,
        /// The failure of the final attempt
        last_failure: Box<TransportError>,
    },

    /// A lifecycle phase was requested from a state that cannot reach it.
    #[error("Cannot move '{name}' from {current} to {requested}")]
    LifecycleViolation {
        /// Component name
        name: String,
        /// State at the time of the request
        current: LifecycleState,
        /// State that was requested
        requested: LifecycleState,
    },

    /// Initialise was requested on an already initialised component.
    #[error("'{0}' is already initialised")]
    AlreadyInitialised(String),

    /// The component has been disposed.
    #[error("'{0}' has been disposed")]
    Disposed(String),

    /// No pooled instance became available.
    #[error("Pool exhausted for key '{key}'")]
    PoolExhausted {
        /// Pool key
        key: String,
    },

    /// A pooled instance failed to be created, activated or validated.
    #[error("Pool {operation} failed for key '{key}': {message}")]
    PoolValidation {
        /// Pool key
        key: String,
        /// Pool operation (make, activate, validate, ...)
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// Dispatching to an endpoint failed.
    #[error("Dispatch to '{endpoint}' failed: {source}")]
    Dispatch {
        /// Endpoint address
        endpoint: String,
        /// Underlying failure
        source: Box<TransportError>,
    },

    /// A receiver is already registered under the key.
    #[error("A receiver is already registered for key '{0}'")]
    DuplicateReceiver(String),

    /// The endpoint protocol is not supported by the connector.
    #[error("Protocol '{protocol}' is not supported by connector '{connector}'")]
    UnsupportedProtocol {
        /// Requested protocol
        protocol: String,
        /// Connector name
        connector: String,
    },

    /// A fault occurred and the connector has no exception listener.
    #[error("No exception listener configured on '{connector}' to handle: {error}")]
    NoExceptionListener {
        /// Connector name
        connector: String,
        /// The unhandled failure
        error: Box<TransportError>,
    },

    /// Work was rejected by a worker pool.
    #[error("Work rejected by '{pool}': {reason}")]
    WorkRejected {
        /// Worker pool name
        pool: String,
        /// Reason for rejection
        reason: String,
    },

    /// The operation is not supported by the transport.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The current operation was interrupted.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// A transaction could not be started, committed or rolled back.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The operation did not complete within the specified timeout.
    #[error("Operation timed out")]
    Timeout,

    /// The runtime was configured with invalid parameters.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),

    /// Failed to serialize or deserialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Creates a retryable connect error with no component attribution.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            component: None,
        }
    }

    /// Creates a retryable connect error attributed to a component.
    pub fn connect_for(component: FailedComponent, message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            component: Some(component),
        }
    }

    /// Wraps a failure as a dispatch error for the given endpoint.
    pub fn dispatch(endpoint: impl Into<String>, source: TransportError) -> Self {
        Self::Dispatch {
            endpoint: endpoint.into(),
            source: Box::new(source),
        }
    }

    /// Attributes a connect-class error to `component` if it has no attribution yet.
    ///
    /// Other errors are returned unchanged.
    #[must_use]
    pub fn with_component(self, component: FailedComponent) -> Self {
        match self {
            Self::Connect {
                message,
                component: None,
            } => Self::Connect {
                message,
                component: Some(component),
            },
            other => other,
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connect { .. } => ErrorKind::Connect,
            Self::FatalConnect(_) => ErrorKind::FatalConnect,
            Self::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            Self::LifecycleViolation { .. } | Self::AlreadyInitialised(_) | Self::Disposed(_) => {
                ErrorKind::Lifecycle
            }
            Self::PoolExhausted { .. } | Self::PoolValidation { .. } => ErrorKind::Pool,
            Self::Dispatch { .. } | Self::SendFailed(_) | Self::ReceiveFailed(_) => {
                ErrorKind::Dispatch
            }
            Self::DuplicateReceiver(_)
            | Self::UnsupportedProtocol { .. }
            | Self::NoExceptionListener { .. }
            | Self::ConfigurationError(_)
            | Self::Unsupported(_) => ErrorKind::Configuration,
            Self::WorkRejected { .. } | Self::Interrupted(_) => ErrorKind::Work,
            Self::Transaction(_) => ErrorKind::Transaction,
            Self::Timeout => ErrorKind::Timeout,
            Self::Io(_) | Self::SerializationFailed(_) => ErrorKind::Io,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is a connect-class failure eligible for reconnection.
    ///
    /// A dispatch error is connect-class when its cause is.
    pub fn is_connect_class(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Dispatch { source, .. } => source.is_connect_class(),
            _ => false,
        }
    }

    /// Whether a retry policy may attempt the failed work again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connect | ErrorKind::Timeout | ErrorKind::Io
        )
    }

    /// Whether the error terminates a retry loop and must not be retried.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }

    /// Whether the error signals an interruption of the current operation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// The component a connect-class error is attributed to, if any.
    pub fn failed_component(&self) -> Option<&FailedComponent> {
        match self {
            Self::Connect { component, .. } => component.as_ref(),
            Self::Dispatch { source, .. } => source.failed_component(),
            Self::RetryExhausted { last_failure, .. } => last_failure.failed_component(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
