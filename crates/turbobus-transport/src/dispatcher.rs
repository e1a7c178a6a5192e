//! Pooled outbound connectables: dispatchers and requesters.
//!
//! Both roles are [`PooledConnectable`]s over a transport hook object. The
//! connector keeps one [`KeyedPool`](crate::pool::KeyedPool) per role, keyed
//! by endpoint; [`ConnectablePoolFactory`] creates instances through the
//! connector's transport factory and brings each instance's lifecycle phase
//! in line with the connector's before it is handed out.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;

use crate::connectable::{self, Connectable, ConnectableCore};
use crate::connector::ConnectorInner;
use crate::core::{
    ConnectableHooks, ConnectableKind, ConnectionState, DispatcherHooks, Endpoint, EndpointKey,
    FailedComponent, LifecycleState, RequesterHooks, TransportError, TransportMessage,
    TransportResult,
};
use crate::pool::PooledObjectFactory;
use crate::retry::RetryPolicyTemplate;
use crate::work::Executor;

/// Transport hooks that can back a pooled connectable.
pub(crate) trait PooledRole: ConnectableHooks + 'static {
    const KIND: ConnectableKind;
    const ROLE: &'static str;

    fn as_hooks(&self) -> &dyn ConnectableHooks;

    fn component(uri: String) -> FailedComponent;

    fn create(connector: &ConnectorInner, endpoint: Arc<Endpoint>) -> TransportResult<Arc<Self>>;

    fn executor(connector: &ConnectorInner) -> Arc<dyn Executor>;
}

impl PooledRole for dyn DispatcherHooks {
    const KIND: ConnectableKind = ConnectableKind::Dispatcher;
    const ROLE: &'static str = "dispatcher";

    fn as_hooks(&self) -> &dyn ConnectableHooks {
        self
    }

    fn component(uri: String) -> FailedComponent {
        FailedComponent::Dispatcher(uri)
    }

    fn create(connector: &ConnectorInner, endpoint: Arc<Endpoint>) -> TransportResult<Arc<Self>> {
        match connector.dispatcher_factory() {
            Some(factory) => factory.create(endpoint),
            None => Err(TransportError::Unsupported(format!(
                "connector '{}' has no dispatcher factory",
                connector.name()
            ))),
        }
    }

    fn executor(connector: &ConnectorInner) -> Arc<dyn Executor> {
        Arc::clone(connector.dispatcher_work_manager()) as _
    }
}

impl PooledRole for dyn RequesterHooks {
    const KIND: ConnectableKind = ConnectableKind::Requester;
    const ROLE: &'static str = "requester";

    fn as_hooks(&self) -> &dyn ConnectableHooks {
        self
    }

    fn component(uri: String) -> FailedComponent {
        FailedComponent::Requester(uri)
    }

    fn create(connector: &ConnectorInner, endpoint: Arc<Endpoint>) -> TransportResult<Arc<Self>> {
        match connector.requester_factory() {
            Some(factory) => factory.create(endpoint),
            None => Err(TransportError::Unsupported(format!(
                "connector '{}' has no requester factory",
                connector.name()
            ))),
        }
    }

    fn executor(connector: &ConnectorInner) -> Arc<dyn Executor> {
        Arc::clone(connector.requester_work_manager()) as _
    }
}

/// A pool-managed connectable bound to one endpoint.
pub struct PooledConnectable<H: ?Sized> {
    core: ConnectableCore,
    endpoint: Arc<Endpoint>,
    hooks: Arc<H>,
    connector: Weak<ConnectorInner>,
}

/// Pooled one-way or request-response sender.
pub type MessageDispatcher = PooledConnectable<dyn DispatcherHooks>;

/// Pooled synchronous reader.
pub type MessageRequester = PooledConnectable<dyn RequesterHooks>;

impl<H: ?Sized + fmt::Debug> fmt::Debug for PooledConnectable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnectable")
            .field("name", &self.core.name())
            .field("endpoint", &self.endpoint.address())
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl<H: ?Sized> PooledConnectable<H> {
    /// The endpoint this instance is bound to.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Current lifecycle phase.
    pub fn lifecycle_state(&self) -> LifecycleState {
        self.core.lifecycle().phase()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.core.lifecycle().connection()
    }

    /// Whether the instance is connected.
    pub fn is_connected(&self) -> bool {
        self.core.lifecycle().is_connected()
    }

    /// Whether the instance is started.
    pub fn is_started(&self) -> bool {
        self.core.lifecycle().is_started()
    }
}

impl<H: ?Sized + PooledRole> PooledConnectable<H> {
    fn new(connector: &ConnectorInner, endpoint: Arc<Endpoint>, hooks: Arc<H>) -> Self {
        Self {
            core: ConnectableCore::new(
                H::KIND,
                format!("{}.{}.{}", connector.name(), H::ROLE, endpoint.address()),
                connector.emitter().clone(),
                Arc::clone(connector.metrics()),
            ),
            endpoint,
            hooks,
            connector: connector.weak(),
        }
    }

    pub(crate) async fn validate_connection(&self) -> TransportResult<()> {
        self.hooks.validate_connection().await
    }
}

impl MessageDispatcher {
    /// Whether the instance may be reused.
    pub fn validate(&self) -> bool {
        connectable::validate(self)
    }

    /// Connects if needed, then sends without waiting for a response.
    pub(crate) async fn dispatch(self: &Arc<Self>, message: TransportMessage) -> TransportResult<()> {
        connectable::connect(self).await?;
        self.hooks.do_dispatch(message).await
    }

    /// Connects if needed, then sends and waits for the response.
    pub(crate) async fn send(
        self: &Arc<Self>,
        message: TransportMessage,
    ) -> TransportResult<TransportMessage> {
        connectable::connect(self).await?;
        self.hooks.do_send(message).await
    }
}

impl MessageRequester {
    /// Whether the instance may be reused.
    pub fn validate(&self) -> bool {
        connectable::validate(self)
    }

    /// Connects if needed, then reads one message.
    pub(crate) async fn request(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> TransportResult<Option<TransportMessage>> {
        connectable::connect(self).await?;
        self.hooks.do_request(timeout).await
    }
}

#[async_trait]
impl<H: ?Sized + PooledRole> Connectable for PooledConnectable<H> {
    fn core(&self) -> &ConnectableCore {
        &self.core
    }

    fn hooks(&self) -> &dyn ConnectableHooks {
        self.hooks.as_hooks()
    }

    fn component(&self) -> FailedComponent {
        H::component(self.endpoint.address().to_string())
    }

    fn resolve_retry_template(&self) -> Arc<dyn RetryPolicyTemplate> {
        match self.connector.upgrade() {
            Some(connector) => connector.retry_template_for(&self.endpoint),
            None => crate::retry::template_for(&Default::default(), None),
        }
    }

    fn executor(&self) -> Option<Arc<dyn Executor>> {
        self.connector.upgrade().map(|c| H::executor(&c))
    }
}

/// Creates, syncs, validates and destroys pooled connectables.
pub(crate) struct ConnectablePoolFactory<H: ?Sized> {
    connector: Weak<ConnectorInner>,
    role: PhantomData<fn() -> Arc<H>>,
}

impl<H: ?Sized> ConnectablePoolFactory<H> {
    pub(crate) fn new(connector: Weak<ConnectorInner>) -> Self {
        Self {
            connector,
            role: PhantomData,
        }
    }
}

#[async_trait]
impl<H: ?Sized + PooledRole> PooledObjectFactory<EndpointKey, Arc<PooledConnectable<H>>>
    for ConnectablePoolFactory<H>
{
    async fn make(&self, key: &EndpointKey) -> TransportResult<Arc<PooledConnectable<H>>> {
        let connector = self
            .connector
            .upgrade()
            .ok_or_else(|| TransportError::Disposed(key.uri().to_string()))?;
        let endpoint = Arc::clone(key.endpoint());
        let hooks = H::create(&connector, Arc::clone(&endpoint))?;
        let instance = Arc::new(PooledConnectable::new(&connector, endpoint, hooks));
        connectable::initialise(&instance).await?;
        Ok(instance)
    }

    async fn destroy(&self, _key: &EndpointKey, value: Arc<PooledConnectable<H>>) {
        connectable::dispose(&value).await;
    }

    /// Starts the instance if the connector is started, stops it otherwise.
    async fn activate(
        &self,
        _key: &EndpointKey,
        value: &Arc<PooledConnectable<H>>,
    ) -> TransportResult<()> {
        let connector_started = self
            .connector
            .upgrade()
            .is_some_and(|connector| connector.is_started());
        if connector_started {
            connectable::start(value).await
        } else {
            if value.is_started() {
                connectable::stop(value).await;
            }
            Ok(())
        }
    }

    async fn passivate(
        &self,
        _key: &EndpointKey,
        _value: &Arc<PooledConnectable<H>>,
    ) -> TransportResult<()> {
        Ok(())
    }

    async fn validate(&self, _key: &EndpointKey, value: &Arc<PooledConnectable<H>>) -> bool {
        connectable::validate(value.as_ref())
    }
}
