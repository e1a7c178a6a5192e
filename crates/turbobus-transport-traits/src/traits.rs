//! Hook, factory and listener traits implemented by transports and their users.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{TransportError, TransportResult};
use crate::message::TransportMessage;
use crate::metrics::AtomicMetrics;
use crate::types::{Endpoint, ReceiveMode, TransactionConfig};

/// Transport-specific behaviour plugged into a connectable's lifecycle.
///
/// Every hook defaults to a no-op; a transport overrides only what it needs.
/// The runtime guarantees the hooks of one instance are never invoked
/// concurrently for connect, disconnect, start and stop.
#[async_trait]
pub trait ConnectableHooks: Send + Sync + fmt::Debug {
    /// Called once during the initialise phase.
    async fn do_initialise(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Opens the underlying resource. Failures should be connect-class
    /// errors so the retry policy can act on them.
    async fn do_connect(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Closes the underlying resource.
    async fn do_disconnect(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Called during the start phase, after a successful connect.
    async fn do_start(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Called during the stop phase.
    async fn do_stop(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Releases everything the instance holds.
    async fn do_dispose(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Checks that an established connection is still usable.
    async fn validate_connection(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Vetoes reuse of a pooled instance.
    fn validate(&self) -> bool {
        true
    }
}

/// Hooks that do nothing; the default for connectors without transport logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ConnectableHooks for NoopHooks {}

/// Hooks of an inbound message source.
#[async_trait]
pub trait ReceiverHooks: ConnectableHooks {
    /// How the runtime drives this receiver.
    fn receive_mode(&self) -> ReceiveMode {
        ReceiveMode::Push
    }

    /// Returns the next batch of messages; called by the polling scheduler.
    async fn get_messages(&self) -> TransportResult<Vec<TransportMessage>> {
        Ok(Vec::new())
    }

    /// Called with the listener's response for request-response endpoints.
    async fn on_routed(&self, response: TransportMessage) -> TransportResult<()> {
        let _ = response;
        Ok(())
    }
}

/// Hooks of a pooled one-way or request-response sender.
#[async_trait]
pub trait DispatcherHooks: ConnectableHooks {
    /// Sends a message without waiting for a response.
    async fn do_dispatch(&self, message: TransportMessage) -> TransportResult<()>;

    /// Sends a message and waits for the response.
    async fn do_send(&self, message: TransportMessage) -> TransportResult<TransportMessage> {
        let _ = message;
        Err(TransportError::Unsupported(
            "this dispatcher does not support request-response sends".to_string(),
        ))
    }
}

/// Hooks of a pooled synchronous reader.
#[async_trait]
pub trait RequesterHooks: ConnectableHooks {
    /// Reads one message, waiting at most `timeout`.
    async fn do_request(&self, timeout: Duration) -> TransportResult<Option<TransportMessage>>;
}

/// The routing engine's entry point for inbound messages.
#[async_trait]
pub trait MessageListener: Send + Sync + fmt::Debug {
    /// Processes a message, optionally producing a response.
    async fn on_message(&self, message: TransportMessage)
    -> TransportResult<Option<TransportMessage>>;
}

/// Receives faults that cannot be propagated to a caller.
pub trait ExceptionListener: Send + Sync + fmt::Debug {
    /// Called for every fault the connector forwards.
    fn exception_thrown(&self, error: &TransportError);
}

/// Begins transactions for transacted endpoints.
#[async_trait]
pub trait TransactionManager: Send + Sync + fmt::Debug {
    /// Begins a transaction.
    async fn begin(&self, config: &TransactionConfig) -> TransportResult<Box<dyn Transaction>>;
}

/// A transaction in progress; consumed by commit or rollback.
#[async_trait]
pub trait Transaction: Send + fmt::Debug {
    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> TransportResult<()>;

    /// Rolls the transaction back.
    async fn rollback(self: Box<Self>) -> TransportResult<()>;
}

/// Everything a receiver needs to hand messages to the routing engine.
#[derive(Debug, Clone)]
pub struct ReceiverContext {
    connector: String,
    key: String,
    endpoint: Arc<Endpoint>,
    listener: Arc<dyn MessageListener>,
    metrics: Arc<AtomicMetrics>,
}

impl ReceiverContext {
    /// Creates a context.
    pub fn new(
        connector: impl Into<String>,
        key: impl Into<String>,
        endpoint: Arc<Endpoint>,
        listener: Arc<dyn MessageListener>,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        Self {
            connector: connector.into(),
            key: key.into(),
            endpoint,
            listener,
            metrics,
        }
    }

    /// Name of the owning connector.
    pub fn connector(&self) -> &str {
        &self.connector
    }

    /// Key the receiver is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The endpoint being received from.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The registered listener.
    pub fn listener(&self) -> &Arc<dyn MessageListener> {
        &self.listener
    }

    /// Passes a message to the listener and returns its response.
    pub async fn route(&self, message: TransportMessage) -> TransportResult<Option<TransportMessage>> {
        AtomicMetrics::incr(&self.metrics.messages_received);
        self.listener.on_message(message).await
    }
}

/// Creates receivers for a connector.
pub trait ReceiverFactory: Send + Sync + fmt::Debug {
    /// Creates a receiver bound to the context's endpoint.
    fn create(&self, context: ReceiverContext) -> TransportResult<Arc<dyn ReceiverHooks>>;
}

/// Creates pooled dispatchers for a connector.
pub trait DispatcherFactory: Send + Sync + fmt::Debug {
    /// Creates a dispatcher bound to `endpoint`.
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn DispatcherHooks>>;
}

/// Creates pooled requesters for a connector.
pub trait RequesterFactory: Send + Sync + fmt::Debug {
    /// Creates a requester bound to `endpoint`.
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn RequesterHooks>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _test_hooks_object(_h: &dyn ConnectableHooks) {}
    fn _test_receiver_object(_h: &dyn ReceiverHooks) {}
    fn _test_dispatcher_object(_h: &dyn DispatcherHooks) {}
    fn _test_requester_object(_h: &dyn RequesterHooks) {}
    fn _test_factory_objects(
        _r: &dyn ReceiverFactory,
        _d: &dyn DispatcherFactory,
        _q: &dyn RequesterFactory,
    ) {
    }

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl MessageListener for Echo {
        async fn on_message(
            &self,
            message: TransportMessage,
        ) -> TransportResult<Option<TransportMessage>> {
            Ok(Some(message.reply("echo")))
        }
    }

    #[tokio::test]
    async fn test_noop_hooks_succeed() {
        let hooks = NoopHooks;
        assert!(hooks.do_connect().await.is_ok());
        assert!(hooks.do_dispose().await.is_ok());
        assert!(hooks.validate());
    }

    #[tokio::test]
    async fn test_context_routes_and_counts() {
        let metrics = Arc::new(AtomicMetrics::new());
        let endpoint = Arc::new(Endpoint::parse("vm://in").unwrap());
        let ctx = ReceiverContext::new("vm", "vm://in", endpoint, Arc::new(Echo), metrics.clone());

        let request = TransportMessage::new("hi");
        let id = request.id;
        let response = ctx.route(request).await.unwrap().unwrap();
        assert_eq!(response.correlation_id, Some(id));
        assert_eq!(metrics.snapshot().messages_received, 1);
    }
}
