//! # TurboBus Transport Traits
//!
//! Core connector traits and types for the TurboBus transport runtime.
//! This crate provides the foundational abstractions that every transport
//! implementation and the connector engine depend on.
//!
//! ## Overview
//!
//! This crate defines:
//! - **Hooks**: [`ConnectableHooks`], [`ReceiverHooks`], [`DispatcherHooks`], [`RequesterHooks`]
//! - **Factories**: [`ReceiverFactory`], [`DispatcherFactory`], [`RequesterFactory`]
//! - **Listeners**: [`MessageListener`], [`ExceptionListener`], [`TransactionManager`]
//! - **Types**: [`Endpoint`], [`LifecycleState`], [`ConnectionState`], [`TransportMessage`]
//! - **Errors**: [`TransportError`], [`TransportResult`], [`FailedComponent`]
//! - **Config**: [`ThreadingProfile`], [`PoolConfig`], [`PollingConfig`], [`RetryPolicyConfig`]
//! - **Metrics**: [`ConnectorMetrics`], [`AtomicMetrics`]
//!
//! ## Usage
//!
//! Transports implement the hook traits and hand factories to a connector:
//!
//! ```rust,ignore
//! use turbobus_transport_traits::{ConnectableHooks, DispatcherHooks, TransportMessage, TransportResult};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! struct MyDispatcher { /* ... */ }
//!
//! #[async_trait]
//! impl ConnectableHooks for MyDispatcher {
//!     async fn do_connect(&self) -> TransportResult<()> { /* ... */ }
//! }
//!
//! #[async_trait]
//! impl DispatcherHooks for MyDispatcher {
//!     async fn do_dispatch(&self, message: TransportMessage) -> TransportResult<()> { /* ... */ }
//! }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod config;
mod error;
mod events;
mod message;
mod metrics;
mod traits;
mod types;

// Re-export all public items
pub use config::{
    ExhaustedAction, PollingConfig, PoolConfig, PoolExhaustedAction, RetryPolicyConfig,
    RetryPolicyKind, ThreadingProfile, TransactedReceiverConfig,
};
pub use error::{ErrorKind, FailedComponent, TransportError, TransportResult};
pub use events::{ConnectorEvent, ConnectorEventEmitter, Notification};
pub use message::{MessagePayload, PayloadStream, TransportMessage};
pub use metrics::{AtomicMetrics, ConnectorMetrics};
pub use traits::{
    ConnectableHooks, DispatcherFactory, DispatcherHooks, ExceptionListener, MessageListener,
    NoopHooks, ReceiverContext, ReceiverFactory, ReceiverHooks, RequesterFactory, RequesterHooks,
    Transaction, TransactionManager,
};
pub use types::{
    ConnectableKind, ConnectionState, Endpoint, EndpointKey, ExchangePattern, LifecycleState,
    ReceiveMode, TransactionAction, TransactionConfig,
};
