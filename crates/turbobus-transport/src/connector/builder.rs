//! Connector construction.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;

use super::{Connector, ConnectorInner, EventReceiver};
use crate::config::ConnectorConfig;
use crate::connectable::ConnectableCore;
use crate::core::{
    AtomicMetrics, ConnectableHooks, ConnectableKind, ConnectorEventEmitter, DispatcherFactory,
    DispatcherHooks, EndpointKey, ExceptionListener, NoopHooks, PoolConfig, ReceiverFactory,
    RequesterFactory, RequesterHooks, RetryPolicyConfig, TransactionManager, TransportError,
    TransportResult,
};
use crate::dispatcher::{ConnectablePoolFactory, MessageDispatcher, MessageRequester};
use crate::pool::{KeyedPool, KeyedPoolConfig, PooledObjectFactory};
use crate::retry::{ConnectNotifier, RetryNotifier, RetryPolicyTemplate, template_for};
use crate::work::WorkManager;

/// Builder for [`Connector`].
///
/// # Example
///
/// ```rust,ignore
/// let connector = Connector::builder("vm", "vm")
///     .receiver_factory(Arc::new(QueueReceivers::new(broker.clone())))
///     .dispatcher_factory(Arc::new(QueueDispatchers::new(broker)))
///     .exception_listener(Arc::new(LogExceptions))
///     .build()?;
/// ```
#[derive(Debug)]
pub struct ConnectorBuilder {
    name: String,
    protocol: String,
    aliases: Vec<String>,
    config: ConnectorConfig,
    hooks: Arc<dyn ConnectableHooks>,
    receiver_factory: Option<Arc<dyn ReceiverFactory>>,
    dispatcher_factory: Option<Arc<dyn DispatcherFactory>>,
    requester_factory: Option<Arc<dyn RequesterFactory>>,
    exception_listener: Option<Arc<dyn ExceptionListener>>,
    transaction_manager: Option<Arc<dyn TransactionManager>>,
    retry_template: Option<Arc<dyn RetryPolicyTemplate>>,
    retry_notifier: Option<Arc<dyn RetryNotifier>>,
    event_capacity: usize,
}

impl ConnectorBuilder {
    pub(super) fn new(name: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: protocol.into().to_ascii_lowercase(),
            aliases: Vec::new(),
            config: ConnectorConfig::default(),
            hooks: Arc::new(NoopHooks),
            receiver_factory: None,
            dispatcher_factory: None,
            requester_factory: None,
            exception_listener: None,
            transaction_manager: None,
            retry_template: None,
            retry_notifier: None,
            event_capacity: 500,
        }
    }

    /// Accepts endpoints of another protocol name.
    #[must_use]
    pub fn alias(mut self, protocol: impl Into<String>) -> Self {
        self.aliases.push(protocol.into());
        self
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ConnectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport hooks of the connector itself.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn ConnectableHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Factory of receivers created by `register_listener`.
    #[must_use]
    pub fn receiver_factory(mut self, factory: Arc<dyn ReceiverFactory>) -> Self {
        self.receiver_factory = Some(factory);
        self
    }

    /// Factory of pooled dispatchers.
    #[must_use]
    pub fn dispatcher_factory(mut self, factory: Arc<dyn DispatcherFactory>) -> Self {
        self.dispatcher_factory = Some(factory);
        self
    }

    /// Factory of pooled requesters.
    #[must_use]
    pub fn requester_factory(mut self, factory: Arc<dyn RequesterFactory>) -> Self {
        self.requester_factory = Some(factory);
        self
    }

    /// Receives faults that cannot be returned to a caller.
    #[must_use]
    pub fn exception_listener(mut self, listener: Arc<dyn ExceptionListener>) -> Self {
        self.exception_listener = Some(listener);
        self
    }

    /// Begins transactions for transacted endpoints.
    #[must_use]
    pub fn transaction_manager(mut self, manager: Arc<dyn TransactionManager>) -> Self {
        self.transaction_manager = Some(manager);
        self
    }

    /// Connector retry policy; shorthand for setting it in the config.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.config.retry_policy = policy;
        self
    }

    /// Custom retry template, used instead of the configured policy.
    #[must_use]
    pub fn retry_template(mut self, template: Arc<dyn RetryPolicyTemplate>) -> Self {
        self.retry_template = Some(template);
        self
    }

    /// Notifier of connect retry outcomes; defaults to logging and events.
    #[must_use]
    pub fn retry_notifier(mut self, notifier: Arc<dyn RetryNotifier>) -> Self {
        self.retry_notifier = Some(notifier);
        self
    }

    /// Capacity of the event channel returned by [`build_with_events`](Self::build_with_events).
    #[must_use]
    pub const fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Builds the connector, discarding its events.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConfigurationError`] for an empty name or
    /// protocol, or invalid limits.
    pub fn build(self) -> TransportResult<Connector> {
        let (emitter, _events) = ConnectorEventEmitter::with_capacity(1);
        self.build_with(emitter)
    }

    /// Builds the connector and returns the receiving end of its events.
    pub fn build_with_events(self) -> TransportResult<(Connector, EventReceiver)> {
        let (emitter, events) = ConnectorEventEmitter::with_capacity(self.event_capacity);
        let connector = self.build_with(emitter)?;
        Ok((connector, events))
    }

    fn build_with(self, emitter: ConnectorEventEmitter) -> TransportResult<Connector> {
        if self.name.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "connector name must not be empty".to_string(),
            ));
        }
        if self.protocol.trim().is_empty() {
            return Err(TransportError::ConfigurationError(
                "connector protocol must not be empty".to_string(),
            ));
        }
        self.config
            .validate()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;

        let Self {
            name,
            protocol,
            aliases,
            config,
            hooks,
            receiver_factory,
            dispatcher_factory,
            requester_factory,
            exception_listener,
            transaction_manager,
            retry_template,
            retry_notifier,
            ..
        } = self;

        let retry_notifier =
            retry_notifier.unwrap_or_else(|| Arc::new(ConnectNotifier::new(emitter.clone())));
        let retry_template = retry_template
            .unwrap_or_else(|| template_for(&config.retry_policy, Some(Arc::clone(&retry_notifier))));
        let metrics = Arc::new(AtomicMetrics::new());

        let work_manager = |role: &str, profile| {
            Arc::new(WorkManager::new(
                format!("{name}.{role}"),
                profile,
                config.work_shutdown_timeout,
                config.work_drain_interval,
            ))
        };
        let receiver_work = work_manager("receiver", config.receiver_threading.clone());
        let dispatcher_work = work_manager("dispatcher", config.dispatcher_threading.clone());
        let requester_work = work_manager("requester", config.requester_threading.clone());

        let inner = Arc::new_cyclic(|weak| {
            let dispatcher_factory_for_pool: Arc<
                dyn PooledObjectFactory<EndpointKey, Arc<MessageDispatcher>>,
            > = Arc::new(ConnectablePoolFactory::<dyn DispatcherHooks>::new(weak.clone()));
            let requester_factory_for_pool: Arc<
                dyn PooledObjectFactory<EndpointKey, Arc<MessageRequester>>,
            > = Arc::new(ConnectablePoolFactory::<dyn RequesterHooks>::new(weak.clone()));

            ConnectorInner {
                core: ConnectableCore::new(
                    ConnectableKind::Connector,
                    name.clone(),
                    emitter,
                    metrics,
                ),
                this: weak.clone(),
                dispatchers: KeyedPool::new(
                    format!("{name}.dispatchers"),
                    pool_config(config.max_dispatchers_active(), &config.dispatcher_pool),
                    dispatcher_factory_for_pool,
                ),
                requesters: KeyedPool::new(
                    format!("{name}.requesters"),
                    pool_config(config.max_requesters_active(), &config.requester_pool),
                    requester_factory_for_pool,
                ),
                protocol,
                aliases,
                config,
                hooks,
                receiver_factory,
                dispatcher_factory,
                requester_factory,
                receivers: DashMap::new(),
                registry_lock: tokio::sync::Mutex::new(()),
                receiver_work,
                dispatcher_work,
                requester_work,
                scheduler: ArcSwapOption::empty(),
                pending_failure: parking_lot::Mutex::new(None),
                exception_listener,
                transaction_manager,
                retry_template,
                retry_notifier,
            }
        });

        Ok(Connector { inner })
    }
}

fn pool_config(max_active: usize, pool: &PoolConfig) -> KeyedPoolConfig {
    KeyedPoolConfig::for_max_active(max_active).with_exhausted_action(pool.exhausted_action, pool.max_wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PoolExhaustedAction;
    use std::time::Duration;

    #[test]
    fn test_rejects_empty_name() {
        let result = Connector::builder("  ", "vm").build();
        assert!(matches!(result, Err(TransportError::ConfigurationError(_))));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ConnectorConfig {
            retry_policy: RetryPolicyConfig::simple(0, Duration::from_millis(1)),
            ..ConnectorConfig::default()
        };
        let result = Connector::builder("vm", "vm").config(config).build();
        assert!(matches!(result, Err(TransportError::ConfigurationError(_))));
    }

    #[test]
    fn test_pool_limits_follow_threading_profiles() {
        let config = ConnectorConfig::builder()
            .dispatcher_threading(crate::core::ThreadingProfile::with_max_active(3))
            .max_requesters_active(5)
            .pool_exhausted_action(PoolExhaustedAction::Fail, None)
            .build()
            .unwrap();
        let connector = Connector::builder("vm", "VM").config(config).build().unwrap();
        assert_eq!(connector.protocol(), "vm");
        assert_eq!(connector.max_dispatchers_active(), 3);
        assert_eq!(connector.max_requesters_active(), 5);
    }
}
