//! The protocol-level connector.
//!
//! A [`Connector`] owns everything one transport configuration needs at
//! runtime: the receivers registered on it, keyed pools of dispatchers and
//! requesters, one worker pool per role, the polling scheduler and the retry
//! policy governing connects. It runs the same lifecycle as the connectables
//! it owns and drives theirs:
//!
//! - **start** starts every registered receiver
//! - **stop** stops receivers and disconnects
//! - **dispose** disposes receivers, closes the pools and drains the worker pools
//!
//! Steady-state connect failures reported through
//! [`Connector::handle_exception`] trigger a reconnect that re-validates the
//! component that failed.

mod builder;
mod pools;
mod registry;

pub use builder::ConnectorBuilder;

use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConnectorConfig;
use crate::connectable::{self, Connectable, ConnectableCore};
use crate::core::{
    AtomicMetrics, ConnectableHooks, ConnectionState, ConnectorEvent, ConnectorEventEmitter,
    ConnectorMetrics, DispatcherFactory, Endpoint, EndpointKey, ExceptionListener,
    FailedComponent, LifecycleState, Notification, ReceiverFactory,
    RequesterFactory, TransactionManager, TransportError, TransportResult,
};
use crate::dispatcher::{MessageDispatcher, MessageRequester};
use crate::pool::KeyedPool;
use crate::polling::Scheduler;
use crate::receiver::MessageReceiver;
use crate::retry::{RetryContext, RetryNotifier, RetryPolicyTemplate, template_for};
use crate::work::{Executor, WorkManager};

/// Handle to a connector; cheap to clone.
#[derive(Debug, Clone)]
pub struct Connector {
    inner: Arc<ConnectorInner>,
}

/// Shared state behind a [`Connector`].
#[derive(Debug)]
pub(crate) struct ConnectorInner {
    core: ConnectableCore,
    this: Weak<ConnectorInner>,
    protocol: String,
    aliases: Vec<String>,
    config: ConnectorConfig,
    hooks: Arc<dyn ConnectableHooks>,
    receiver_factory: Option<Arc<dyn ReceiverFactory>>,
    dispatcher_factory: Option<Arc<dyn DispatcherFactory>>,
    requester_factory: Option<Arc<dyn RequesterFactory>>,
    receivers: DashMap<String, Arc<MessageReceiver>>,
    registry_lock: tokio::sync::Mutex<()>,
    dispatchers: KeyedPool<EndpointKey, Arc<MessageDispatcher>>,
    requesters: KeyedPool<EndpointKey, Arc<MessageRequester>>,
    receiver_work: Arc<WorkManager>,
    dispatcher_work: Arc<WorkManager>,
    requester_work: Arc<WorkManager>,
    scheduler: ArcSwapOption<Scheduler>,
    pending_failure: parking_lot::Mutex<Option<FailedComponent>>,
    exception_listener: Option<Arc<dyn ExceptionListener>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    retry_template: Arc<dyn RetryPolicyTemplate>,
    retry_notifier: Arc<dyn RetryNotifier>,
}

impl Connector {
    /// Starts building a connector for `protocol`.
    pub fn builder(name: impl Into<String>, protocol: impl Into<String>) -> ConnectorBuilder {
        ConnectorBuilder::new(name, protocol)
    }

    /// Connector name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Primary protocol.
    pub fn protocol(&self) -> &str {
        &self.inner.protocol
    }

    /// The configuration the connector was built with.
    pub fn config(&self) -> &ConnectorConfig {
        &self.inner.config
    }

    /// Current lifecycle phase.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.core.lifecycle().phase()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.core.lifecycle().connection()
    }

    /// Whether the connector is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.core.lifecycle().is_connected()
    }

    /// Whether the connector is started.
    pub fn is_started(&self) -> bool {
        self.inner.is_started()
    }

    /// Whether the connector is disposing or disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.core.lifecycle().is_disposed()
    }

    /// The policy governing connector connects.
    pub fn retry_template(&self) -> &Arc<dyn RetryPolicyTemplate> {
        &self.inner.retry_template
    }

    /// Whether `protocol` is the primary protocol or an alias, ignoring case.
    pub fn supports_protocol(&self, protocol: &str) -> bool {
        self.inner.supports_protocol(protocol)
    }

    /// Snapshot of the connector's counters.
    pub fn metrics(&self) -> ConnectorMetrics {
        self.inner.metrics().snapshot()
    }

    /// Work tracked across the three worker pools.
    pub fn pending_work(&self) -> usize {
        self.inner.receiver_work.pending_count()
            + self.inner.dispatcher_work.pending_count()
            + self.inner.requester_work.pending_count()
    }

    /// The receiver worker pool.
    pub fn receiver_work_manager(&self) -> &Arc<WorkManager> {
        &self.inner.receiver_work
    }

    /// The dispatcher worker pool.
    pub fn dispatcher_work_manager(&self) -> &Arc<WorkManager> {
        &self.inner.dispatcher_work
    }

    /// The requester worker pool.
    pub fn requester_work_manager(&self) -> &Arc<WorkManager> {
        &self.inner.requester_work
    }

    /// Initialises the connector; a second call fails.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn initialise(&self) -> TransportResult<()> {
        connectable::initialise(&self.inner).await
    }

    /// Connects under the connector's retry policy.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn connect(&self) -> TransportResult<()> {
        connectable::connect(&self.inner).await
    }

    /// Stops if started, then disconnects the connector and its receivers.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn disconnect(&self) -> TransportResult<()> {
        connectable::disconnect(&self.inner).await
    }

    /// Connects if needed, then starts the connector and every receiver.
    ///
    /// Every receiver is started even when one fails; the first failure is
    /// returned.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn start(&self) -> TransportResult<()> {
        connectable::start(&self.inner).await
    }

    /// Stops the scheduler and receivers, then disconnects. Errors are logged.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn stop(&self) {
        connectable::stop(&self.inner).await;
    }

    /// Stops, disconnects and releases everything the connector owns.
    #[instrument(skip(self), fields(connector = %self.name()))]
    pub async fn dispose(&self) {
        connectable::dispose(&self.inner).await;
    }

    /// Reports a steady-state fault.
    ///
    /// Connect-class faults on a connected connector with a retrying policy
    /// disconnect and reconnect it, re-validating `component` once connected.
    /// Every fault is forwarded to the exception listener.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoExceptionListener`] when no listener is
    /// registered.
    #[instrument(skip(self, error), fields(connector = %self.name()))]
    pub async fn handle_exception(
        &self,
        error: TransportError,
        component: Option<FailedComponent>,
    ) -> TransportResult<()> {
        self.inner.handle_exception(error, component).await
    }
}

impl ConnectorInner {
    pub(crate) fn name(&self) -> &str {
        self.core.name()
    }

    pub(crate) fn weak(&self) -> Weak<Self> {
        Weak::clone(&self.this)
    }

    pub(crate) fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub(crate) fn emitter(&self) -> &ConnectorEventEmitter {
        self.core.emitter()
    }

    pub(crate) fn metrics(&self) -> &Arc<AtomicMetrics> {
        self.core.metrics()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.core.lifecycle().is_started()
    }

    pub(crate) fn transaction_manager(&self) -> Option<Arc<dyn TransactionManager>> {
        self.transaction_manager.clone()
    }

    pub(crate) fn dispatcher_factory(&self) -> Option<&Arc<dyn DispatcherFactory>> {
        self.dispatcher_factory.as_ref()
    }

    pub(crate) fn requester_factory(&self) -> Option<&Arc<dyn RequesterFactory>> {
        self.requester_factory.as_ref()
    }

    pub(crate) fn receiver_work_manager(&self) -> &Arc<WorkManager> {
        &self.receiver_work
    }

    pub(crate) fn dispatcher_work_manager(&self) -> &Arc<WorkManager> {
        &self.dispatcher_work
    }

    pub(crate) fn requester_work_manager(&self) -> &Arc<WorkManager> {
        &self.requester_work
    }

    pub(crate) fn supports_protocol(&self, protocol: &str) -> bool {
        self.protocol.eq_ignore_ascii_case(protocol)
            || self
                .aliases
                .iter()
                .any(|alias| alias.eq_ignore_ascii_case(protocol))
    }

    /// Retry policy of a connectable bound to `endpoint`.
    pub(crate) fn retry_template_for(&self, endpoint: &Endpoint) -> Arc<dyn RetryPolicyTemplate> {
        match endpoint.retry_policy() {
            Some(policy) => template_for(policy, Some(Arc::clone(&self.retry_notifier))),
            None => Arc::clone(&self.retry_template),
        }
    }

    /// Returns the running scheduler, replacing a missing or shut down one.
    pub(crate) fn ensure_scheduler(&self) -> Arc<Scheduler> {
        if let Some(scheduler) = self.scheduler.load_full()
            && !scheduler.is_shutdown()
        {
            return scheduler;
        }
        let scheduler = Arc::new(Scheduler::new(format!("{}.scheduler", self.name())));
        self.scheduler.store(Some(Arc::clone(&scheduler)));
        debug!(connector = %self.name(), "scheduler created");
        scheduler
    }

    fn shutdown_scheduler(&self) {
        if let Some(scheduler) = self.scheduler.load_full() {
            scheduler.shutdown();
        }
    }

    fn check_endpoint(&self, endpoint: &Endpoint) -> TransportResult<()> {
        self.core.lifecycle().check_not_disposed()?;
        if endpoint.address().is_empty() {
            return Err(TransportError::ConfigurationError(
                "endpoint address must not be empty".to_string(),
            ));
        }
        if !self.supports_protocol(endpoint.protocol()) {
            return Err(TransportError::UnsupportedProtocol {
                protocol: endpoint.protocol().to_string(),
                connector: self.name().to_string(),
            });
        }
        Ok(())
    }

    pub(crate) async fn handle_exception(
        self: &Arc<Self>,
        error: TransportError,
        component: Option<FailedComponent>,
    ) -> TransportResult<()> {
        let component = component.or_else(|| error.failed_component().cloned());
        let reconnect = self.core.lifecycle().is_connected()
            && error.is_connect_class()
            && !self.retry_template.is_no_retry();
        if !reconnect {
            return self.forward_exception(&error);
        }

        warn!(
            connector = %self.name(),
            component = ?component,
            error = %error,
            "connection lost, reconnecting"
        );
        AtomicMetrics::incr(&self.metrics().reconnects);
        self.emitter().emit(ConnectorEvent::ReconnectStarted {
            connector: self.name().to_string(),
            component: component.clone(),
        });

        if let Err(e) = connectable::disconnect(self).await {
            warn!(connector = %self.name(), error = %e, "error disconnecting before reconnect");
        }
        let forwarded = self.forward_exception(&error);
        if let Some(component) = component {
            *self.pending_failure.lock() = Some(component);
        }

        if let Err(e) = connectable::connect(self).await {
            self.forward_exception(&e)?;
        }
        forwarded
    }

    fn forward_exception(&self, error: &TransportError) -> TransportResult<()> {
        self.emitter().emit_exception(self.name(), error.clone());
        match &self.exception_listener {
            Some(listener) => {
                listener.exception_thrown(error);
                Ok(())
            }
            None => {
                error!(connector = %self.name(), error = %error, "no exception listener configured");
                Err(TransportError::NoExceptionListener {
                    connector: self.name().to_string(),
                    error: Box::new(error.clone()),
                })
            }
        }
    }

    /// Re-validates the component behind a reconnect.
    async fn validate_component(&self, component: &FailedComponent) -> TransportResult<()> {
        debug!(connector = %self.name(), %component, "validating component after reconnect");
        match component {
            FailedComponent::Connector(_) => Ok(()),
            FailedComponent::Receiver(key) => {
                let Some(receiver) = self.receivers.get(key).map(|r| Arc::clone(r.value())) else {
                    return Ok(());
                };
                receiver.connect().await?;
                receiver.validate_connection().await
            }
            FailedComponent::Dispatcher(uri) => {
                for key in self.dispatchers.keys_where(|key| key.uri() == uri.as_str()) {
                    let dispatcher = self.dispatchers.borrow(&key).await?;
                    let result = match connectable::connect(&*dispatcher).await {
                        Ok(()) => dispatcher.validate_connection().await,
                        Err(e) => Err(e),
                    };
                    dispatcher.release().await;
                    result?;
                }
                Ok(())
            }
            FailedComponent::Requester(uri) => {
                for key in self.requesters.keys_where(|key| key.uri() == uri.as_str()) {
                    let requester = self.requesters.borrow(&key).await?;
                    let result = match connectable::connect(&*requester).await {
                        Ok(()) => requester.validate_connection().await,
                        Err(e) => Err(e),
                    };
                    requester.release().await;
                    result?;
                }
                Ok(())
            }
        }
    }

    fn receiver_snapshot(&self) -> Vec<Arc<MessageReceiver>> {
        self.receivers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[async_trait]
impl Connectable for ConnectorInner {
    fn core(&self) -> &ConnectableCore {
        &self.core
    }

    fn hooks(&self) -> &dyn ConnectableHooks {
        self.hooks.as_ref()
    }

    fn component(&self) -> FailedComponent {
        FailedComponent::Connector(self.name().to_string())
    }

    fn resolve_retry_template(&self) -> Arc<dyn RetryPolicyTemplate> {
        Arc::clone(&self.retry_template)
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        let workers: Arc<dyn Executor> = Arc::clone(&self.receiver_work) as _;
        Some(workers)
    }

    async fn on_initialise(&self) -> TransportResult<()> {
        info!(
            connector = %self.name(),
            protocol = %self.protocol,
            receivers = self.receivers.len(),
            "connector initialised"
        );
        Ok(())
    }

    fn prepare_retry(&self, context: &mut RetryContext) {
        if let Some(component) = self.pending_failure.lock().take() {
            context.set_failed_component(component);
        }
    }

    async fn after_connect(&self, context: &mut RetryContext) -> TransportResult<()> {
        if !self.config.validate_connections {
            context.clear_failed_component();
            return Ok(());
        }
        if let Some(component) = context.failed_component().cloned() {
            self.validate_component(&component).await?;
            context.clear_failed_component();
        }
        Ok(())
    }

    async fn after_disconnect(self: Arc<Self>) {
        for receiver in self.receiver_snapshot() {
            if let Err(e) = receiver.disconnect().await {
                warn!(receiver = %receiver.key(), error = %e, "error disconnecting receiver");
            }
        }
    }

    async fn before_start(&self) -> TransportResult<()> {
        self.ensure_scheduler();
        Ok(())
    }

    async fn after_start(self: Arc<Self>) -> TransportResult<()> {
        let mut first_failure = None;
        for receiver in self.receiver_snapshot() {
            if let Err(e) = receiver.start().await {
                error!(receiver = %receiver.key(), error = %e, "failed to start receiver");
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => {
                info!(connector = %self.name(), "connector started");
                Ok(())
            }
        }
    }

    async fn before_stop(&self) {
        self.shutdown_scheduler();
    }

    async fn after_stop(self: Arc<Self>) {
        for receiver in self.receiver_snapshot() {
            receiver.stop().await;
        }
        if self.core.lifecycle().is_connected()
            && let Err(e) = connectable::disconnect(&self).await
        {
            warn!(connector = %self.name(), error = %e, "error disconnecting on stop");
        }
        self.scheduler.store(None);
        info!(connector = %self.name(), "connector stopped");
    }

    async fn on_dispose(self: Arc<Self>) {
        let receivers: Vec<_> = {
            let keys: Vec<String> = self.receivers.iter().map(|e| e.key().clone()).collect();
            keys.into_iter()
                .filter_map(|key| self.receivers.remove(&key).map(|(_, r)| r))
                .collect()
        };
        for receiver in receivers {
            receiver.dispose().await;
        }

        self.dispatchers.close().await;
        self.requesters.close().await;
        self.shutdown_scheduler();
        self.scheduler.store(None);

        tokio::join!(
            self.receiver_work.dispose(),
            self.dispatcher_work.dispose(),
            self.requester_work.dispose(),
        );
        info!(connector = %self.name(), "connector disposed");
    }
}

/// Channel receiving the events of a connector built with
/// [`ConnectorBuilder::build_with_events`].
pub type EventReceiver = mpsc::Receiver<Notification>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NoopHooks;

    fn connector() -> Connector {
        Connector::builder("vm", "vm")
            .alias("VM-Queue")
            .hooks(Arc::new(NoopHooks))
            .build()
            .unwrap()
    }

    #[test]
    fn test_supports_protocol_ignores_case() {
        let connector = connector();
        assert!(connector.supports_protocol("vm"));
        assert!(connector.supports_protocol("VM"));
        assert!(connector.supports_protocol("vm-queue"));
        assert!(!connector.supports_protocol("jms"));
    }

    #[tokio::test]
    async fn test_lifecycle_round_trip() {
        let connector = connector();
        connector.initialise().await.unwrap();
        connector.start().await.unwrap();
        assert!(connector.is_connected());
        assert_eq!(connector.lifecycle_state(), LifecycleState::Started);

        connector.stop().await;
        assert!(!connector.is_connected());
        assert_eq!(connector.lifecycle_state(), LifecycleState::Stopped);

        connector.dispose().await;
        assert_eq!(connector.lifecycle_state(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_connector_refuses_reinitialise() {
        let connector = connector();
        connector.initialise().await.unwrap();
        let result = connector.initialise().await;
        assert!(matches!(result, Err(TransportError::AlreadyInitialised(_))));
    }

    #[tokio::test]
    async fn test_disposed_connector_rejects_use() {
        let connector = connector();
        connector.dispose().await;
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Disposed(_))
        ));
        assert!(matches!(connector.start().await, Err(TransportError::Disposed(_))));
    }

    #[tokio::test]
    async fn test_exception_without_listener_fails() {
        let connector = connector();
        let result = connector
            .handle_exception(TransportError::ReceiveFailed("boom".into()), None)
            .await;
        assert!(matches!(
            result,
            Err(TransportError::NoExceptionListener { .. })
        ));
    }
}
