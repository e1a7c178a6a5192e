//! Core transport types.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::RetryPolicyConfig;
use crate::error::{TransportError, TransportResult};

/// Lifecycle phase of a connector or connectable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Created but not yet initialised.
    #[default]
    NotInitialised,
    /// The initialise callback is running.
    Initialising,
    /// Initialised and ready to start.
    Initialised,
    /// The start callback is running.
    Starting,
    /// Running.
    Started,
    /// The stop callback is running.
    Stopping,
    /// Stopped; may be started again.
    Stopped,
    /// The dispose callback is running.
    Disposing,
    /// Terminal state.
    Disposed,
}

impl LifecycleState {
    /// Whether the state is `Disposing` or `Disposed`.
    pub const fn is_disposed(self) -> bool {
        matches!(self, Self::Disposing | Self::Disposed)
    }

    /// Whether the state is `Started`.
    pub const fn is_started(self) -> bool {
        matches!(self, Self::Started)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotInitialised => "not_initialised",
            Self::Initialising => "initialising",
            Self::Initialised => "initialised",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Disposing => "disposing",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Connection state, tracked independently of the lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected.
    #[default]
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// Connected.
    Connected,
    /// A disconnect is in progress.
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// The role a connectable plays for its connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectableKind {
    /// The connector itself.
    Connector,
    /// Inbound message source.
    Receiver,
    /// Outbound one-way sender.
    Dispatcher,
    /// Synchronous request/reply client.
    Requester,
}

impl fmt::Display for ConnectableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connector => write!(f, "connector"),
            Self::Receiver => write!(f, "receiver"),
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Requester => write!(f, "requester"),
        }
    }
}

/// Message exchange pattern of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangePattern {
    /// Fire and forget.
    #[default]
    OneWay,
    /// A response is expected.
    RequestResponse,
}

/// How a receiver obtains messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiveMode {
    /// The transport pushes messages from its own callbacks.
    #[default]
    Push,
    /// The runtime polls on a fixed delay.
    Polling,
    /// The runtime polls back-to-back while started.
    Continuous,
}

/// Transaction demarcation requested by an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionAction {
    /// No transaction.
    #[default]
    None,
    /// Always begin a new transaction.
    AlwaysBegin,
    /// Join the current transaction or begin one.
    BeginOrJoin,
}

/// Transaction configuration of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Demarcation action.
    pub action: TransactionAction,
    /// Optional transaction timeout.
    pub timeout: Option<Duration>,
}

impl TransactionConfig {
    /// A configuration that always begins a transaction.
    #[must_use]
    pub const fn always_begin() -> Self {
        Self {
            action: TransactionAction::AlwaysBegin,
            timeout: None,
        }
    }

    /// Whether a transaction is requested at all.
    pub const fn is_transacted(&self) -> bool {
        !matches!(self.action, TransactionAction::None)
    }
}

/// Immutable descriptor of an address, protocol and exchange pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    address: String,
    protocol: String,
    #[serde(default)]
    filter_address: Option<String>,
    #[serde(default)]
    exchange_pattern: ExchangePattern,
    #[serde(default)]
    transaction: Option<TransactionConfig>,
    #[serde(default)]
    retry_policy: Option<RetryPolicyConfig>,
    #[serde(default)]
    polling_frequency: Option<Duration>,
    #[serde(default)]
    properties: HashMap<String, String>,
}

impl Endpoint {
    /// Parses an endpoint from an address URI; the protocol is the URI scheme.
    pub fn parse(address: impl AsRef<str>) -> TransportResult<Self> {
        let address = address.as_ref().trim();
        if address.is_empty() {
            return Err(TransportError::ConfigurationError(
                "endpoint address must not be empty".to_string(),
            ));
        }
        let url = Url::parse(address).map_err(|e| {
            TransportError::ConfigurationError(format!("invalid endpoint address '{address}': {e}"))
        })?;

        Ok(Self {
            address: address.to_string(),
            protocol: url.scheme().to_ascii_lowercase(),
            filter_address: None,
            exchange_pattern: ExchangePattern::OneWay,
            transaction: None,
            retry_policy: None,
            polling_frequency: None,
            properties: HashMap::new(),
        })
    }

    /// Sets the exchange pattern.
    #[must_use]
    pub fn with_exchange_pattern(mut self, pattern: ExchangePattern) -> Self {
        self.exchange_pattern = pattern;
        self
    }

    /// Sets the filter address used as the default receiver key.
    #[must_use]
    pub fn with_filter_address(mut self, filter: impl Into<String>) -> Self {
        self.filter_address = Some(filter.into());
        self
    }

    /// Sets the transaction configuration.
    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = Some(transaction);
        self
    }

    /// Overrides the connector's retry policy for this endpoint.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Overrides the connector's polling frequency for this endpoint.
    #[must_use]
    pub fn with_polling_frequency(mut self, frequency: Duration) -> Self {
        self.polling_frequency = Some(frequency);
        self
    }

    /// Adds a free-form property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The full address URI.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The protocol, in lowercase.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// The filter address, if set.
    pub fn filter_address(&self) -> Option<&str> {
        self.filter_address.as_deref()
    }

    /// The exchange pattern.
    pub const fn exchange_pattern(&self) -> ExchangePattern {
        self.exchange_pattern
    }

    /// The transaction configuration, if any.
    pub const fn transaction(&self) -> Option<&TransactionConfig> {
        self.transaction.as_ref()
    }

    /// Whether the endpoint requests a transaction.
    pub fn is_transacted(&self) -> bool {
        self.transaction.as_ref().is_some_and(TransactionConfig::is_transacted)
    }

    /// The retry policy override, if any.
    pub const fn retry_policy(&self) -> Option<&RetryPolicyConfig> {
        self.retry_policy.as_ref()
    }

    /// The polling frequency override, if any.
    pub const fn polling_frequency(&self) -> Option<Duration> {
        self.polling_frequency
    }

    /// Looks up a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// The key a receiver for this endpoint is registered under by default.
    pub fn receiver_key(&self) -> &str {
        self.filter_address.as_deref().unwrap_or(&self.address)
    }

    /// Builds the pool key for this endpoint.
    pub fn key(self: &Arc<Self>) -> EndpointKey {
        EndpointKey::new(Arc::clone(self))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Pool key for dispatchers and requesters.
///
/// Two keys are equal when their endpoints share the address, exchange
/// pattern, transaction configuration and retry override. Properties and the
/// polling frequency do not affect outbound instances and are ignored.
#[derive(Debug, Clone)]
pub struct EndpointKey {
    uri: String,
    descriptor: String,
    endpoint: Arc<Endpoint>,
}

impl EndpointKey {
    /// Wraps an endpoint.
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        let descriptor = format!(
            "{:?}|{:?}|{:?}",
            endpoint.exchange_pattern(),
            endpoint.transaction(),
            endpoint.retry_policy()
        );
        Self {
            uri: endpoint.address().to_string(),
            descriptor,
            endpoint,
        }
    }

    /// The endpoint address.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The endpoint.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }
}

impl PartialEq for EndpointKey {
    fn eq(&self, other: &Self) -> bool {
        self.uri == other.uri && self.descriptor == other.descriptor
    }
}

impl Eq for EndpointKey {}

impl Hash for EndpointKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uri.hash(state);
        self.descriptor.hash(state);
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}
