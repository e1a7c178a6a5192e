//! Default notifier for connect retries.

use tracing::{error, info};

use crate::core::{ConnectorEvent, ConnectorEventEmitter};

use super::{RetryContext, RetryNotifier};

/// Logs the outcome of connect retries and forwards it as connector events.
#[derive(Debug, Clone, Default)]
pub struct ConnectNotifier {
    emitter: ConnectorEventEmitter,
}

impl ConnectNotifier {
    /// Creates a notifier emitting through `emitter`.
    pub const fn new(emitter: ConnectorEventEmitter) -> Self {
        Self { emitter }
    }
}

impl RetryNotifier for ConnectNotifier {
    fn on_success(&self, context: &RetryContext) {
        if context.attempts() > 1 {
            info!(
                work = %context.description(),
                attempts = context.attempts(),
                "connected after retrying"
            );
        }
        self.emitter.emit(ConnectorEvent::RetrySucceeded {
            description: context.description().to_string(),
            attempts: context.attempts(),
        });
    }

    fn on_failure(&self, context: &RetryContext) {
        error!(
            work = %context.description(),
            attempts = context.attempts(),
            error = ?context.last_failure(),
            "failed to connect"
        );
        self.emitter.emit(ConnectorEvent::RetryExhausted {
            description: context.description().to_string(),
            attempts: context.attempts(),
        });
    }
}
