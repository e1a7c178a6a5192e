//! # TurboBus Transport
//!
//! Connector runtime for message-bus transports. A transport supplies hooks
//! and factories; the runtime supplies everything around them:
//!
//! - **Lifecycle**: initialise, connect, start, stop and dispose with
//!   idempotent, serialised transitions
//! - **Reconnection**: connect attempts under a retry policy, and targeted
//!   reconnects after steady-state faults
//! - **Pooling**: dispatchers and requesters borrowed per endpoint from
//!   bounded keyed pools
//! - **Worker pools**: one per role, with in-flight work tracking for
//!   graceful disposal
//! - **Polling**: fixed-delay and continuous pollers, with transacted
//!   multi-poller fan-out
//!
//! ## Module Organization
//!
//! ```text
//! turbobus-transport/
//! ├── connector/     # Connector, builder, receiver registry, pooled dispatch
//! ├── receiver       # Inbound receivers
//! ├── dispatcher     # Pooled dispatchers and requesters
//! ├── lifecycle      # Phase and connection state machine
//! ├── retry/         # Retry policies and templates
//! ├── pool           # Bounded keyed pool
//! ├── work/          # Executors and work tracking
//! ├── polling/       # Scheduler and polling workers
//! ├── transaction    # Transaction template
//! ├── config         # Connector configuration loading
//! └── logging        # Subscriber initialisation
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use turbobus_transport::{Connector, Endpoint, TransportMessage};
//!
//! let connector = Connector::builder("vm", "vm")
//!     .receiver_factory(receivers)
//!     .dispatcher_factory(dispatchers)
//!     .exception_listener(listener)
//!     .build()?;
//!
//! connector
//!     .register_listener(router, Endpoint::parse("vm://orders")?)
//!     .await?;
//! connector.start().await?;
//!
//! let out = Arc::new(Endpoint::parse("vm://invoices")?);
//! connector.dispatch(&out, TransportMessage::new("hello")).await?;
//!
//! connector.dispose().await;
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

pub mod config;
mod connectable;
pub mod connector;
pub mod core;
pub mod dispatcher;
pub mod lifecycle;
pub mod logging;
pub mod polling;
pub mod pool;
pub mod receiver;
pub mod retry;
pub mod transaction;
pub mod work;

pub use config::{ConfigError, ConnectorConfig, ConnectorConfigBuilder};
pub use connector::{Connector, ConnectorBuilder, EventReceiver};
pub use core::*;
pub use dispatcher::{MessageDispatcher, MessageRequester, PooledConnectable};
pub use lifecycle::{ComponentState, LifecycleManager, LifecyclePhase};
pub use logging::{LogOutput, LogRotation, LoggingConfig, LoggingGuard};
pub use polling::{ScheduledTask, Scheduler};
pub use pool::{KeyStats, KeyedPool, KeyedPoolConfig, PoolStats, PooledObject, PooledObjectFactory};
pub use receiver::MessageReceiver;
pub use retry::{
    ConnectNotifier, RetryCallback, RetryContext, RetryNotifier, RetryPolicy, RetryPolicyTemplate,
    template_for,
};
pub use transaction::TransactionTemplate;
pub use work::{Executor, TokioExecutor, WorkManager};
