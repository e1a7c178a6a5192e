//! Lifecycle state machine shared by the connector and its connectables.
//!
//! One [`LifecycleManager`] holds the lifecycle phase and the connection state
//! of a component in a single cell. Phase transitions run a callback while the
//! component is "in transition" and commit the terminal state only when the
//! transition is allowed to complete:
//!
//! ```text
//! NotInitialised -> Initialising -> Initialised -> Starting -> Started
//!                                       ^                        |
//!                                       |                     Stopping
//!                                       |                        v
//!                                       +---- (reinitialise) -- Stopped
//!
//! any state -> Disposing -> Disposed
//! ```
//!
//! Initialise and start callbacks that fail restore the previous phase and
//! propagate the error. Stop and dispose callbacks that fail are logged and the
//! terminal state is committed anyway.

use std::future::Future;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::{ConnectionState, LifecycleState, TransportError, TransportResult};

/// Lifecycle phase requested from a [`LifecycleManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Initialise.
    Initialise,
    /// Start.
    Start,
    /// Stop.
    Stop,
    /// Dispose.
    Dispose,
}

impl LifecyclePhase {
    const fn transitional(self) -> LifecycleState {
        match self {
            Self::Initialise => LifecycleState::Initialising,
            Self::Start => LifecycleState::Starting,
            Self::Stop => LifecycleState::Stopping,
            Self::Dispose => LifecycleState::Disposing,
        }
    }

    const fn terminal(self) -> LifecycleState {
        match self {
            Self::Initialise => LifecycleState::Initialised,
            Self::Start => LifecycleState::Started,
            Self::Stop => LifecycleState::Stopped,
            Self::Dispose => LifecycleState::Disposed,
        }
    }
}

/// Lifecycle phase and connection state of one component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentState {
    /// Lifecycle phase.
    pub phase: LifecycleState,
    /// Connection state.
    pub connection: ConnectionState,
}

enum Decision {
    Run(LifecycleState),
    Skip,
}

/// Enforces legal lifecycle transitions for one named component.
#[derive(Debug)]
pub struct LifecycleManager {
    name: String,
    allow_reinitialise: bool,
    state: Mutex<ComponentState>,
}

impl LifecycleManager {
    /// Creates a manager; `allow_reinitialise` permits initialise from `Stopped`.
    pub fn new(name: impl Into<String>, allow_reinitialise: bool) -> Self {
        Self {
            name: name.into(),
            allow_reinitialise,
            state: Mutex::new(ComponentState::default()),
        }
    }

    /// Name used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle phase and connection state.
    pub fn snapshot(&self) -> ComponentState {
        *self.state.lock()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> LifecycleState {
        self.state.lock().phase
    }

    /// Current connection state.
    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Replaces the connection state.
    pub fn set_connection(&self, connection: ConnectionState) {
        self.state.lock().connection = connection;
    }

    /// Moves the connection state from `from` to `to`; returns false if the
    /// current state is not `from`.
    pub fn transition_connection(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.connection == from {
            state.connection = to;
            true
        } else {
            false
        }
    }

    /// Whether the component is connected.
    pub fn is_connected(&self) -> bool {
        self.connection() == ConnectionState::Connected
    }

    /// Whether the component is started.
    pub fn is_started(&self) -> bool {
        self.phase().is_started()
    }

    /// Whether the component is stopping or stopped.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self.phase(),
            LifecycleState::Stopping | LifecycleState::Stopped
        )
    }

    /// Whether the component is disposing or disposed.
    pub fn is_disposed(&self) -> bool {
        self.phase().is_disposed()
    }

    /// Fails with [`TransportError::Disposed`] if the component is disposed.
    pub fn check_not_disposed(&self) -> TransportResult<()> {
        if self.is_disposed() {
            return Err(TransportError::Disposed(self.name.clone()));
        }
        Ok(())
    }

    /// Runs `callback` as the initialise transition.
    ///
    /// A component that allows reinitialising runs the callback again from
    /// `Stopped` and treats any other initialised phase as a no-op. One that
    /// does not fails with [`TransportError::AlreadyInitialised`] once it has
    /// left `NotInitialised`.
    pub async fn fire_initialise<F, Fut>(&self, callback: F) -> TransportResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        self.fire_fallible(LifecyclePhase::Initialise, callback).await
    }

    /// Runs `callback` as the start transition; a no-op when already started.
    pub async fn fire_start<F, Fut>(&self, callback: F) -> TransportResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        self.fire_fallible(LifecyclePhase::Start, callback).await
    }

    /// Runs `callback` as the stop transition.
    ///
    /// Returns false without running the callback when the component is not
    /// started.
    pub async fn fire_stop<F, Fut>(&self, callback: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        self.fire_terminal(LifecyclePhase::Stop, callback).await
    }

    /// Runs `callback` as the dispose transition.
    ///
    /// Returns false without running the callback when already disposing or
    /// disposed.
    pub async fn fire_dispose<F, Fut>(&self, callback: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        self.fire_terminal(LifecyclePhase::Dispose, callback).await
    }

    async fn fire_fallible<F, Fut>(&self, phase: LifecyclePhase, callback: F) -> TransportResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        let previous = match self.enter(phase)? {
            Decision::Run(previous) => previous,
            Decision::Skip => return Ok(()),
        };

        match callback().await {
            Ok(()) => {
                self.commit(phase);
                Ok(())
            }
            Err(e) => {
                debug!(
                    component = %self.name,
                    phase = ?phase,
                    error = %e,
                    "lifecycle callback failed, restoring {previous}"
                );
                self.state.lock().phase = previous;
                Err(e)
            }
        }
    }

    async fn fire_terminal<F, Fut>(&self, phase: LifecyclePhase, callback: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TransportResult<()>>,
    {
        match self.enter(phase) {
            Ok(Decision::Run(_)) => {}
            Ok(Decision::Skip) | Err(_) => return false,
        }

        if let Err(e) = callback().await {
            warn!(
                component = %self.name,
                phase = ?phase,
                error = %e,
                "error during lifecycle callback, continuing"
            );
        }
        self.commit(phase);
        true
    }

    /// Validates the transition and moves to the transitional state.
    fn enter(&self, phase: LifecyclePhase) -> TransportResult<Decision> {
        let mut state = self.state.lock();
        let current = state.phase;

        let decision = match (phase, current) {
            (LifecyclePhase::Initialise, LifecycleState::NotInitialised) => Decision::Run(current),
            (LifecyclePhase::Initialise, LifecycleState::Stopped) if self.allow_reinitialise => {
                Decision::Run(current)
            }
            (LifecyclePhase::Initialise, LifecycleState::Disposing | LifecycleState::Disposed) => {
                return Err(TransportError::Disposed(self.name.clone()));
            }
            (LifecyclePhase::Initialise, _) if self.allow_reinitialise => Decision::Skip,
            (LifecyclePhase::Initialise, _) => {
                return Err(TransportError::AlreadyInitialised(self.name.clone()));
            }

            (LifecyclePhase::Start, LifecycleState::Initialised | LifecycleState::Stopped) => {
                Decision::Run(current)
            }
            (LifecyclePhase::Start, LifecycleState::Starting | LifecycleState::Started) => {
                Decision::Skip
            }
            (LifecyclePhase::Start, LifecycleState::Disposing | LifecycleState::Disposed) => {
                return Err(TransportError::Disposed(self.name.clone()));
            }
            (LifecyclePhase::Start, _) => {
                return Err(TransportError::LifecycleViolation {
                    name: self.name.clone(),
                    current,
                    requested: LifecycleState::Started,
                });
            }

            (LifecyclePhase::Stop, LifecycleState::Started) => Decision::Run(current),
            (LifecyclePhase::Stop, _) => Decision::Skip,

            (LifecyclePhase::Dispose, LifecycleState::Disposing | LifecycleState::Disposed) => {
                Decision::Skip
            }
            (LifecyclePhase::Dispose, _) => Decision::Run(current),
        };

        if let Decision::Run(_) = decision {
            state.phase = phase.transitional();
        }
        Ok(decision)
    }

    fn commit(&self, phase: LifecyclePhase) {
        let mut state = self.state.lock();
        state.phase = phase.terminal();
        debug!(component = %self.name, state = %state.phase, "lifecycle transition complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok() -> impl Future<Output = TransportResult<()>> {
        async { Ok(()) }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let lifecycle = LifecycleManager::new("test", true);
        assert_eq!(lifecycle.phase(), LifecycleState::NotInitialised);

        lifecycle.fire_initialise(ok).await.unwrap();
        assert_eq!(lifecycle.phase(), LifecycleState::Initialised);

        lifecycle.fire_start(ok).await.unwrap();
        assert!(lifecycle.is_started());

        assert!(lifecycle.fire_stop(ok).await);
        assert_eq!(lifecycle.phase(), LifecycleState::Stopped);

        lifecycle.fire_start(ok).await.unwrap();
        assert!(lifecycle.is_started());

        assert!(lifecycle.fire_dispose(ok).await);
        assert_eq!(lifecycle.phase(), LifecycleState::Disposed);
    }

    #[tokio::test]
    async fn test_start_before_initialise_is_rejected() {
        let lifecycle = LifecycleManager::new("test", true);
        let err = lifecycle.fire_start(ok).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::LifecycleViolation {
                current: LifecycleState::NotInitialised,
                requested: LifecycleState::Started,
                ..
            }
        ));
        assert_eq!(lifecycle.phase(), LifecycleState::NotInitialised);
    }

    #[tokio::test]
    async fn test_failed_start_restores_previous_phase() {
        let lifecycle = LifecycleManager::new("test", true);
        lifecycle.fire_initialise(ok).await.unwrap();

        let result = lifecycle
            .fire_start(|| async { Err(TransportError::connect("refused")) })
            .await;
        assert!(result.is_err());
        assert_eq!(lifecycle.phase(), LifecycleState::Initialised);
    }

    #[tokio::test]
    async fn test_stop_errors_are_swallowed() {
        let lifecycle = LifecycleManager::new("test", true);
        lifecycle.fire_initialise(ok).await.unwrap();
        lifecycle.fire_start(ok).await.unwrap();

        let ran = lifecycle
            .fire_stop(|| async { Err(TransportError::Internal("boom".into())) })
            .await;
        assert!(ran);
        assert_eq!(lifecycle.phase(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_and_dispose_are_idempotent() {
        let lifecycle = LifecycleManager::new("test", true);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let count = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        assert!(!lifecycle.fire_stop(count).await);
        assert!(lifecycle.fire_dispose(count).await);
        assert!(!lifecycle.fire_dispose(count).await);
        assert!(!lifecycle.fire_stop(count).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connector_refuses_reinitialise() {
        let lifecycle = LifecycleManager::new("connector", false);
        lifecycle.fire_initialise(ok).await.unwrap();
        assert!(matches!(
            lifecycle.fire_initialise(ok).await,
            Err(TransportError::AlreadyInitialised(_))
        ));

        lifecycle.fire_start(ok).await.unwrap();
        lifecycle.fire_stop(ok).await;
        assert!(matches!(
            lifecycle.fire_initialise(ok).await,
            Err(TransportError::AlreadyInitialised(_))
        ));
    }

    #[tokio::test]
    async fn test_connectable_reinitialises_from_stopped() {
        let lifecycle = LifecycleManager::new("receiver", true);
        lifecycle.fire_initialise(ok).await.unwrap();
        lifecycle.fire_initialise(ok).await.unwrap();
        lifecycle.fire_start(ok).await.unwrap();
        lifecycle.fire_stop(ok).await;
        lifecycle.fire_initialise(ok).await.unwrap();
        assert_eq!(lifecycle.phase(), LifecycleState::Initialised);
    }

    #[tokio::test]
    async fn test_disposed_rejects_initialise_and_start() {
        let lifecycle = LifecycleManager::new("test", true);
        lifecycle.fire_dispose(ok).await;
        assert!(matches!(
            lifecycle.fire_initialise(ok).await,
            Err(TransportError::Disposed(_))
        ));
        assert!(matches!(
            lifecycle.fire_start(ok).await,
            Err(TransportError::Disposed(_))
        ));
        assert!(lifecycle.check_not_disposed().is_err());
    }

    #[test]
    fn test_connection_transitions() {
        let lifecycle = LifecycleManager::new("test", true);
        assert!(lifecycle.transition_connection(
            ConnectionState::Disconnected,
            ConnectionState::Connecting
        ));
        assert!(!lifecycle.transition_connection(
            ConnectionState::Disconnected,
            ConnectionState::Connecting
        ));
        lifecycle.set_connection(ConnectionState::Connected);
        assert!(lifecycle.is_connected());
    }
}
