//! Core connector traits, types, and errors.
//!
//! This module re-exports the foundational abstractions from [`turbobus_transport_traits`]
//! that transports implement and the connector engine drives.

pub use turbobus_transport_traits::{
    AtomicMetrics,

    // Traits
    ConnectableHooks,
    ConnectableKind,
    ConnectionState,
    // Events
    ConnectorEvent,
    ConnectorEventEmitter,
    // Metrics
    ConnectorMetrics,
    DispatcherFactory,
    DispatcherHooks,
    // Core types
    Endpoint,
    EndpointKey,
    // Error types
    ErrorKind,
    ExceptionListener,
    ExchangePattern,
    // Config
    ExhaustedAction,
    FailedComponent,
    LifecycleState,
    MessageListener,
    // Message types
    MessagePayload,
    NoopHooks,
    Notification,
    PayloadStream,
    PollingConfig,
    PoolConfig,
    PoolExhaustedAction,
    ReceiveMode,
    ReceiverContext,
    ReceiverFactory,
    ReceiverHooks,
    RequesterFactory,
    RequesterHooks,
    RetryPolicyConfig,
    RetryPolicyKind,
    ThreadingProfile,
    TransactedReceiverConfig,
    Transaction,
    TransactionAction,
    TransactionConfig,
    TransactionManager,
    TransportError,
    TransportMessage,
    TransportResult,
};
