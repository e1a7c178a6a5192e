//! Inbound message receivers.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::connectable::{self, Connectable, ConnectableCore};
use crate::connector::ConnectorInner;
use crate::core::{
    ConnectableHooks, ConnectableKind, ConnectionState, Endpoint, ExchangePattern,
    FailedComponent, LifecycleState, ReceiveMode, ReceiverContext, ReceiverHooks,
    RetryPolicyConfig, TransportError, TransportMessage, TransportResult,
};
use crate::polling::{self, PollingWorker, ScheduledTask};
use crate::retry::RetryPolicyTemplate;
use crate::transaction::TransactionTemplate;
use crate::work::Executor;

/// A long-lived receiver registered on a connector under a receiver key.
///
/// Push receivers deliver messages through their [`ReceiverContext`] on their
/// own. Polling receivers are driven by the connector's scheduler while
/// started.
#[derive(Debug)]
pub struct MessageReceiver {
    core: ConnectableCore,
    key: String,
    endpoint: Arc<Endpoint>,
    hooks: Arc<dyn ReceiverHooks>,
    context: ReceiverContext,
    connector: Weak<ConnectorInner>,
    transaction: TransactionTemplate,
    batch_in_transaction: bool,
    pollers: Mutex<Vec<ScheduledTask>>,
}

impl MessageReceiver {
    pub(crate) fn new(
        connector: &Arc<ConnectorInner>,
        context: ReceiverContext,
        hooks: Arc<dyn ReceiverHooks>,
    ) -> Self {
        let key = context.key().to_string();
        let endpoint = Arc::clone(context.endpoint());
        Self {
            core: ConnectableCore::new(
                ConnectableKind::Receiver,
                format!("{}.receiver.{}", connector.name(), key),
                connector.emitter().clone(),
                Arc::clone(connector.metrics()),
            ),
            transaction: TransactionTemplate::new(
                connector.transaction_manager(),
                endpoint.transaction().copied(),
            ),
            batch_in_transaction: connector.config().transacted.receive_in_transaction,
            key,
            endpoint,
            hooks,
            context,
            connector: Arc::downgrade(connector),
            pollers: Mutex::new(Vec::new()),
        }
    }

    /// Key the receiver is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The endpoint being received from.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The context handed to the transport.
    pub fn context(&self) -> &ReceiverContext {
        &self.context
    }

    /// Current lifecycle phase.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.core.lifecycle().phase()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.core.lifecycle().connection()
    }

    /// Whether the receiver is connected.
    pub fn is_connected(&self) -> bool {
        self.core.lifecycle().is_connected()
    }

    /// Whether the receiver is started.
    pub fn is_started(&self) -> bool {
        self.core.lifecycle().is_started()
    }

    /// Whether the receiver can be used; false once disposed or vetoed by the transport.
    pub fn validate(&self) -> bool {
        connectable::validate(self)
    }

    /// Number of scheduled pollers.
    pub fn poller_count(&self) -> usize {
        self.pollers.lock().len()
    }

    /// Connects under the receiver's retry policy.
    pub async fn connect(self: &Arc<Self>) -> TransportResult<()> {
        connectable::connect(self).await
    }

    /// Stops if started, then disconnects.
    pub async fn disconnect(self: &Arc<Self>) -> TransportResult<()> {
        connectable::disconnect(self).await
    }

    /// Connects if needed and starts polling.
    pub async fn start(self: &Arc<Self>) -> TransportResult<()> {
        connectable::start(self).await
    }

    /// Stops polling; errors are logged.
    pub async fn stop(self: &Arc<Self>) {
        connectable::stop(self).await;
    }

    /// Stops, disconnects and releases the receiver.
    pub async fn dispose(self: &Arc<Self>) {
        connectable::dispose(self).await;
    }

    pub(crate) async fn initialise(self: &Arc<Self>) -> TransportResult<()> {
        connectable::initialise(self).await
    }

    pub(crate) async fn validate_connection(&self) -> TransportResult<()> {
        self.hooks.validate_connection().await
    }

    /// Polls the transport once and routes everything it returns.
    ///
    /// Transacted endpoints run the batch in one transaction, or fan each
    /// message out to a receiver worker in its own transaction when batch
    /// transactions are disabled.
    pub async fn poll(self: &Arc<Self>) -> TransportResult<()> {
        if self.transaction.is_transacted() && !self.batch_in_transaction {
            let messages = self.hooks.get_messages().await?;
            let connector = self.connector()?;
            return polling::fan_out(self, connector.receiver_work_manager(), messages).await;
        }

        let this = self;
        self.transaction
            .execute(move || async move {
                let messages = this.hooks.get_messages().await?;
                for message in messages {
                    this.route_message(message).await?;
                }
                Ok(())
            })
            .await
    }

    pub(crate) async fn route_in_transaction(&self, message: TransportMessage) -> TransportResult<()> {
        self.transaction
            .execute(move || self.route_message(message))
            .await
    }

    /// Hands a message to the listener, passing any response back to the
    /// transport for request-response endpoints.
    async fn route_message(&self, message: TransportMessage) -> TransportResult<()> {
        let response = self.context.route(message).await?;
        if let Some(response) = response
            && self.endpoint.exchange_pattern() == ExchangePattern::RequestResponse
        {
            self.hooks.on_routed(response).await?;
        }
        Ok(())
    }

    /// Interruptions stop the receiver; other failures go to the connector.
    pub(crate) async fn poll_failed(self: &Arc<Self>, failure: TransportError) {
        if failure.is_interrupted() {
            debug!(receiver = %self.key, error = %failure, "poll interrupted, stopping receiver");
            self.stop().await;
            return;
        }

        let Some(connector) = self.connector.upgrade() else {
            warn!(receiver = %self.key, error = %failure, "poll failed after connector was dropped");
            return;
        };
        if let Err(e) = connector.handle_exception(failure, Some(self.component())).await {
            error!(receiver = %self.key, error = %e, "unhandled receiver failure");
        }
    }

    fn connector(&self) -> TransportResult<Arc<ConnectorInner>> {
        self.connector
            .upgrade()
            .ok_or_else(|| TransportError::Disposed(self.core.name().to_string()))
    }

    fn cancel_pollers(&self) {
        let pollers = std::mem::take(&mut *self.pollers.lock());
        for poller in &pollers {
            poller.cancel();
        }
        if !pollers.is_empty() {
            debug!(receiver = %self.key, pollers = pollers.len(), "pollers cancelled");
        }
    }
}

#[async_trait]
impl Connectable for MessageReceiver {
    fn core(&self) -> &ConnectableCore {
        &self.core
    }

    fn hooks(&self) -> &dyn ConnectableHooks {
        self.hooks.as_ref()
    }

    fn component(&self) -> FailedComponent {
        FailedComponent::Receiver(self.key.clone())
    }

    fn resolve_retry_template(&self) -> Arc<dyn RetryPolicyTemplate> {
        match self.connector.upgrade() {
            Some(connector) => connector.retry_template_for(&self.endpoint),
            None => crate::retry::template_for(&RetryPolicyConfig::default(), None),
        }
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        let connector = self.connector.upgrade()?;
        let workers: Arc<dyn Executor> = Arc::clone(connector.receiver_work_manager()) as _;
        Some(workers)
    }

    async fn after_start(self: Arc<Self>) -> TransportResult<()> {
        let mode = self.hooks.receive_mode();
        if mode == ReceiveMode::Push {
            return Ok(());
        }

        let connector = self.connector()?;
        let config = connector.config();
        let count = polling::poller_count(
            &self.endpoint,
            &config.transacted,
            &config.receiver_threading,
        );
        let frequency = polling::polling_frequency(&self.endpoint, &config.polling);
        let continuous = mode == ReceiveMode::Continuous || config.polling.continuous;
        let scheduler = connector.ensure_scheduler();

        let mut pollers = Vec::with_capacity(count);
        for index in 0..count {
            let worker = Arc::new(PollingWorker::new(&self));
            let name = format!("{}.poller.{index}", self.key);
            let tick = move || {
                let worker = Arc::clone(&worker);
                async move { worker.run().await }
            };
            let task = if continuous {
                scheduler.schedule_continuous(name, config.polling.start_delay, tick)
            } else {
                scheduler.schedule_with_fixed_delay(
                    name,
                    config.polling.start_delay,
                    frequency,
                    tick,
                )
            };
            pollers.push(task);
        }

        debug!(
            receiver = %self.key,
            pollers = count,
            frequency_ms = frequency.as_millis() as u64,
            continuous,
            "polling scheduled"
        );
        self.pollers.lock().extend(pollers);
        Ok(())
    }

    async fn before_stop(&self) {
        self.cancel_pollers();
    }

    async fn on_dispose(self: Arc<Self>) {
        self.cancel_pollers();
    }
}
