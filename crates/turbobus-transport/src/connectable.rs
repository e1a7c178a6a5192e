//! Connect, start, stop and dispose protocol shared by every connectable.
//!
//! The connector, its receivers and its pooled dispatchers and requesters all
//! run the same state machine; they differ only in what happens around the
//! transport hooks, which each role supplies through [`Connectable`].
//!
//! Locking: `connect_lock` serialises connect and disconnect, and
//! `lifecycle_lock` serialises initialise, start, stop and dispose. Start may
//! take the connect lock while holding the lifecycle lock; the reverse never
//! happens, so disconnect stops a started instance before taking its lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::{
    AtomicMetrics, ConnectableHooks, ConnectableKind, ConnectionState, ConnectorEventEmitter,
    FailedComponent, LifecycleState, TransportError, TransportResult,
};
use crate::lifecycle::LifecycleManager;
use crate::retry::{RetryCallback, RetryContext, RetryPolicyTemplate};
use crate::work::Executor;

/// State shared by every connectable role.
#[derive(Debug)]
pub(crate) struct ConnectableCore {
    kind: ConnectableKind,
    lifecycle: LifecycleManager,
    connect_lock: Mutex<()>,
    lifecycle_lock: Mutex<()>,
    start_on_connect: AtomicBool,
    retry_template: RwLock<Option<Arc<dyn RetryPolicyTemplate>>>,
    emitter: ConnectorEventEmitter,
    metrics: Arc<AtomicMetrics>,
}

impl ConnectableCore {
    pub(crate) fn new(
        kind: ConnectableKind,
        name: impl Into<String>,
        emitter: ConnectorEventEmitter,
        metrics: Arc<AtomicMetrics>,
    ) -> Self {
        Self {
            kind,
            lifecycle: LifecycleManager::new(name, kind != ConnectableKind::Connector),
            connect_lock: Mutex::new(()),
            lifecycle_lock: Mutex::new(()),
            start_on_connect: AtomicBool::new(false),
            retry_template: RwLock::new(None),
            emitter,
            metrics,
        }
    }

    pub(crate) fn name(&self) -> &str {
        self.lifecycle.name()
    }

    pub(crate) const fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub(crate) fn emitter(&self) -> &ConnectorEventEmitter {
        &self.emitter
    }

    pub(crate) fn metrics(&self) -> &Arc<AtomicMetrics> {
        &self.metrics
    }

    pub(crate) fn retry_template(&self) -> Option<Arc<dyn RetryPolicyTemplate>> {
        self.retry_template.read().clone()
    }

    fn set_retry_template(&self, template: Arc<dyn RetryPolicyTemplate>) {
        *self.retry_template.write() = Some(template);
    }
}

/// Role-specific behaviour around the transport hooks.
#[async_trait]
pub(crate) trait Connectable: Send + Sync + Sized + 'static {
    fn core(&self) -> &ConnectableCore;

    fn hooks(&self) -> &dyn ConnectableHooks;

    /// Identity used to attribute connect failures.
    fn component(&self) -> FailedComponent;

    /// Effective retry policy: an endpoint override or the connector default.
    fn resolve_retry_template(&self) -> Arc<dyn RetryPolicyTemplate>;

    /// Worker pool for asynchronous retries.
    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }

    async fn on_initialise(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Prepares the context of a connect execution.
    fn prepare_retry(&self, _context: &mut RetryContext) {}

    /// Runs after `do_connect` succeeded, before the instance counts as connected.
    async fn after_connect(&self, _context: &mut RetryContext) -> TransportResult<()> {
        Ok(())
    }

    async fn after_disconnect(self: Arc<Self>) {}

    async fn before_start(&self) -> TransportResult<()> {
        Ok(())
    }

    async fn after_start(self: Arc<Self>) -> TransportResult<()> {
        Ok(())
    }

    async fn before_stop(&self) {}

    async fn after_stop(self: Arc<Self>) {}

    async fn on_dispose(self: Arc<Self>) {}
}

/// Whether the instance may be reused.
pub(crate) fn validate<T: Connectable>(this: &T) -> bool {
    !this.core().lifecycle.is_disposed() && this.hooks().validate()
}

pub(crate) async fn initialise<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let _guard = this.core().lifecycle_lock.lock().await;
    initialise_locked(this).await
}

async fn initialise_locked<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let core = this.core();
    core.lifecycle
        .fire_initialise(move || async move {
            core.set_retry_template(this.resolve_retry_template());
            this.on_initialise().await?;
            this.hooks().do_initialise().await
        })
        .await
}

/// Initialises a never-initialised instance; concurrent callers initialise once.
async fn ensure_initialised<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let core = this.core();
    if core.lifecycle.phase() != LifecycleState::NotInitialised {
        return Ok(());
    }
    let _guard = core.lifecycle_lock.lock().await;
    if core.lifecycle.phase() == LifecycleState::NotInitialised {
        initialise_locked(this).await?;
    }
    Ok(())
}

fn template_for<T: Connectable>(this: &T) -> Arc<dyn RetryPolicyTemplate> {
    let core = this.core();
    if let Some(template) = core.retry_template() {
        return template;
    }
    let template = this.resolve_retry_template();
    core.set_retry_template(Arc::clone(&template));
    template
}

/// Connects through the retry template; returns immediately if connected.
///
/// Concurrent callers queue on the connect lock, so a second caller returns
/// only after the first attempt has finished. If that attempt connected, the
/// second caller sees `Connected` and returns without connecting again.
/// `Connecting` is only visible under the lock while an asynchronous retry is
/// still running in the background.
pub(crate) async fn connect<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let core = this.core();
    core.lifecycle.check_not_disposed()?;
    if core.lifecycle.is_connected() {
        return Ok(());
    }
    ensure_initialised(this).await?;

    let guard = core.connect_lock.lock().await;
    core.lifecycle.check_not_disposed()?;
    match core.lifecycle.connection() {
        ConnectionState::Connected => return Ok(()),
        ConnectionState::Connecting => {
            debug!(component = %core.name(), "background connect already running");
            return Ok(());
        }
        // disconnecting is only ever set under this lock
        ConnectionState::Disconnected | ConnectionState::Disconnecting => {
            core.lifecycle.set_connection(ConnectionState::Connecting);
        }
    }

    let template = template_for(this.as_ref());
    let asynchronous = !template.is_synchronous();
    let mut context = RetryContext::new(format!("connecting {}", core.name()));
    this.prepare_retry(&mut context);

    let callback = Arc::new(ConnectCallback {
        target: Arc::clone(this),
        asynchronous,
    });
    let result = template
        .execute_with_context(callback, context, this.executor())
        .await;
    if result.is_err() {
        core.lifecycle.set_connection(ConnectionState::Disconnected);
    }
    drop(guard);

    match result {
        Ok(context) if !context.is_ok() => {
            debug!(component = %core.name(), "connecting in the background");
            return Ok(());
        }
        Ok(_) => {}
        Err(e) => return Err(e),
    }

    if core.start_on_connect.swap(false, Ordering::AcqRel) {
        start_boxed(Arc::clone(this)).await?;
    }
    Ok(())
}

/// Disconnects, stopping first if started; a no-op if not connected.
pub(crate) async fn disconnect<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let core = this.core();
    if !core.lifecycle.is_connected() {
        return Ok(());
    }
    if core.lifecycle.is_started() {
        core.start_on_connect.store(true, Ordering::Release);
        stop(this).await;
    }

    let guard = core.connect_lock.lock().await;
    if !core
        .lifecycle
        .transition_connection(ConnectionState::Connected, ConnectionState::Disconnecting)
    {
        return Ok(());
    }
    let result = this.hooks().do_disconnect().await;
    core.lifecycle.set_connection(ConnectionState::Disconnected);
    core.emitter.emit_disconnected(core.kind, core.name());
    drop(guard);

    Arc::clone(this).after_disconnect().await;
    debug!(component = %core.name(), "disconnected");
    result
}

/// Starts, connecting first if needed.
///
/// With an asynchronous retry policy the start is deferred until the
/// background connect succeeds.
pub(crate) async fn start<T: Connectable>(this: &Arc<T>) -> TransportResult<()> {
    let core = this.core();
    core.lifecycle.check_not_disposed()?;
    if matches!(
        core.lifecycle.phase(),
        LifecycleState::Starting | LifecycleState::Started
    ) {
        return Ok(());
    }
    ensure_initialised(this).await?;

    if !core.lifecycle.is_connected() {
        if !template_for(this.as_ref()).is_synchronous() {
            core.start_on_connect.store(true, Ordering::Release);
            return connect(this).await;
        }
        core.start_on_connect.store(false, Ordering::Release);
        connect(this).await?;
    }

    let _guard = core.lifecycle_lock.lock().await;
    core.lifecycle
        .fire_start(move || async move {
            this.before_start().await?;
            this.hooks().do_start().await?;
            Arc::clone(this).after_start().await
        })
        .await
}

pub(crate) fn start_boxed<T: Connectable>(this: Arc<T>) -> BoxFuture<'static, TransportResult<()>> {
    Box::pin(async move { start(&this).await })
}

/// Stops; errors are logged and swallowed.
pub(crate) async fn stop<T: Connectable>(this: &Arc<T>) {
    let core = this.core();
    let _guard = core.lifecycle_lock.lock().await;
    core.lifecycle
        .fire_stop(move || async move {
            this.before_stop().await;
            let result = this.hooks().do_stop().await;
            Arc::clone(this).after_stop().await;
            result
        })
        .await;
}

/// Best-effort stop and disconnect, then dispose.
pub(crate) async fn dispose<T: Connectable>(this: &Arc<T>) {
    let core = this.core();
    if core.lifecycle.is_disposed() {
        return;
    }
    stop(this).await;
    if let Err(e) = disconnect(this).await {
        warn!(component = %core.name(), error = %e, "error disconnecting during dispose");
    }

    let _guard = core.lifecycle_lock.lock().await;
    core.lifecycle
        .fire_dispose(move || async move {
            Arc::clone(this).on_dispose().await;
            this.hooks().do_dispose().await
        })
        .await;
}

struct ConnectCallback<T> {
    target: Arc<T>,
    asynchronous: bool,
}

impl<T: Connectable> ConnectCallback<T> {
    fn failed(&self, attempt: u32, error: TransportError) -> TransportError {
        let core = self.target.core();
        AtomicMetrics::incr(&core.metrics.failed_connects);
        core.emitter
            .emit_connect_failed(core.name(), attempt, error.clone());
        error
    }
}

#[async_trait]
impl<T: Connectable> RetryCallback for ConnectCallback<T> {
    async fn do_work(&self, context: &mut RetryContext) -> TransportResult<()> {
        let target = &self.target;
        let core = target.core();
        if core.lifecycle.is_disposed() {
            return Err(TransportError::Disposed(core.name().to_string()));
        }

        if let Err(e) = target.hooks().do_connect().await {
            let e = e.with_component(target.component());
            return Err(self.failed(context.attempts(), e));
        }
        if let Err(e) = target.after_connect(context).await {
            return Err(self.failed(context.attempts(), e));
        }

        core.lifecycle.set_connection(ConnectionState::Connected);
        AtomicMetrics::incr(&core.metrics.connects);
        core.emitter.emit_connected(core.kind, core.name());
        context.set_ok();
        debug!(component = %core.name(), attempt = context.attempts(), "connected");

        if self.asynchronous && core.start_on_connect.swap(false, Ordering::AcqRel) {
            let target = Arc::clone(target);
            tokio::spawn(async move {
                if let Err(e) = start(&target).await {
                    warn!(component = %target.core().name(), error = %e, "deferred start failed");
                }
            });
        }
        Ok(())
    }

    fn work_description(&self) -> String {
        format!("connecting {}", self.target.core().name())
    }

    fn on_give_up(&self, failure: &TransportError) {
        let core = self.target.core();
        core.lifecycle.set_connection(ConnectionState::Disconnected);
        debug!(component = %core.name(), error = %failure, "gave up connecting");
    }
}
