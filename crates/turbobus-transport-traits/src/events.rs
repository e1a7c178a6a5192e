//! Connector event types.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{FailedComponent, TransportError};
use crate::types::ConnectableKind;

/// Represents events that occur within a connector's lifecycle.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A connectable established its connection.
    Connected {
        /// Role of the connectable.
        kind: ConnectableKind,
        /// Name of the connectable.
        name: String,
    },

    /// A connectable closed its connection.
    Disconnected {
        /// Role of the connectable.
        kind: ConnectableKind,
        /// Name of the connectable.
        name: String,
    },

    /// A connect attempt failed.
    ConnectFailed {
        /// Name of the connectable.
        name: String,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// The failure.
        error: TransportError,
    },

    /// A reconnect was started after a connect-class fault.
    ReconnectStarted {
        /// Name of the connector.
        connector: String,
        /// The sub-resource that failed, if known.
        component: Option<FailedComponent>,
    },

    /// Retried work eventually succeeded.
    RetrySucceeded {
        /// Description of the retried work.
        description: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The retry policy gave up.
    RetryExhausted {
        /// Description of the retried work.
        description: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A fault was forwarded to the exception listener.
    ExceptionThrown {
        /// Name of the connector.
        connector: String,
        /// The fault.
        error: TransportError,
    },
}

/// A timestamped [`ConnectorEvent`].
#[derive(Debug, Clone)]
pub struct Notification {
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// The event.
    pub event: ConnectorEvent,
}

/// An emitter for broadcasting `ConnectorEvent`s to listeners.
#[derive(Debug, Clone)]
pub struct ConnectorEventEmitter {
    sender: mpsc::Sender<Notification>,
}

impl ConnectorEventEmitter {
    /// Creates a new event emitter and a corresponding receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<Notification>) {
        Self::with_capacity(500)
    }

    /// Creates an emitter whose channel holds at most `capacity` pending events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Emits an event, dropping it if the channel is full to avoid blocking.
    pub fn emit(&self, event: ConnectorEvent) {
        let _ = self.sender.try_send(Notification {
            timestamp: Utc::now(),
            event,
        });
    }

    /// Emits a `Connected` event.
    pub fn emit_connected(&self, kind: ConnectableKind, name: impl Into<String>) {
        self.emit(ConnectorEvent::Connected {
            kind,
            name: name.into(),
        });
    }

    /// Emits a `Disconnected` event.
    pub fn emit_disconnected(&self, kind: ConnectableKind, name: impl Into<String>) {
        self.emit(ConnectorEvent::Disconnected {
            kind,
            name: name.into(),
        });
    }

    /// Emits a `ConnectFailed` event.
    pub fn emit_connect_failed(&self, name: impl Into<String>, attempt: u32, error: TransportError) {
        self.emit(ConnectorEvent::ConnectFailed {
            name: name.into(),
            attempt,
            error,
        });
    }

    /// Emits an `ExceptionThrown` event.
    pub fn emit_exception(&self, connector: impl Into<String>, error: TransportError) {
        self.emit(ConnectorEvent::ExceptionThrown {
            connector: connector.into(),
            error,
        });
    }
}

impl Default for ConnectorEventEmitter {
    fn default() -> Self {
        Self::new().0
    }
}
