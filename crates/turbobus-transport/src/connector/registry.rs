//! Receiver registration and lookup.

use std::sync::Arc;

use regex::RegexBuilder;
use tracing::{debug, info, warn};

use super::{Connector, ConnectorInner};
use crate::core::{Endpoint, MessageListener, ReceiverContext, TransportError, TransportResult};
use crate::receiver::MessageReceiver;

impl Connector {
    /// Registers a receiver for `endpoint` under the endpoint's receiver key.
    ///
    /// The receiver is started immediately when the connector is started.
    ///
    /// # Errors
    ///
    /// Fails when the connector is disposed, the protocol is not supported,
    /// a receiver already exists for the key, or the receiver cannot be
    /// created, initialised or started.
    pub async fn register_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        endpoint: Endpoint,
    ) -> TransportResult<Arc<MessageReceiver>> {
        let key = endpoint.receiver_key().to_string();
        self.register_listener_with_key(listener, endpoint, key).await
    }

    /// Registers a receiver under an explicit key.
    pub async fn register_listener_with_key(
        &self,
        listener: Arc<dyn MessageListener>,
        endpoint: Endpoint,
        key: impl Into<String>,
    ) -> TransportResult<Arc<MessageReceiver>> {
        self.inner
            .register_listener(listener, Arc::new(endpoint), key.into())
            .await
    }

    /// Disposes and removes the receiver registered under `key`.
    ///
    /// Returns false when no receiver is registered for the key.
    pub async fn unregister_listener(&self, key: &str) -> bool {
        let removed = {
            let _guard = self.inner.registry_lock.lock().await;
            self.inner.receivers.remove(key).map(|(_, receiver)| receiver)
        };
        match removed {
            Some(receiver) => {
                receiver.dispose().await;
                info!(connector = %self.name(), receiver = %key, "receiver unregistered");
                true
            }
            None => false,
        }
    }

    /// The receiver registered under `key`.
    pub fn get_receiver(&self, key: &str) -> Option<Arc<MessageReceiver>> {
        self.inner.receivers.get(key).map(|r| Arc::clone(r.value()))
    }

    /// Receivers whose key matches a wildcard pattern, ignoring case.
    ///
    /// `*` matches any run of characters and `?` a single character.
    pub fn get_receivers(&self, pattern: &str) -> Vec<Arc<MessageReceiver>> {
        let Some(matcher) = key_matcher(pattern) else {
            warn!(pattern, "invalid receiver key pattern");
            return Vec::new();
        };
        let mut receivers: Vec<_> = self
            .inner
            .receivers
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        receivers.sort_by(|a, b| a.key().cmp(b.key()));
        receivers
    }

    /// Number of registered receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner.receivers.len()
    }
}

impl ConnectorInner {
    async fn register_listener(
        self: &Arc<Self>,
        listener: Arc<dyn MessageListener>,
        endpoint: Arc<Endpoint>,
        key: String,
    ) -> TransportResult<Arc<MessageReceiver>> {
        self.check_endpoint(&endpoint)?;

        let receiver = {
            let _guard = self.registry_lock.lock().await;
            if self.receivers.contains_key(&key) {
                return Err(TransportError::DuplicateReceiver(key));
            }
            let Some(factory) = &self.receiver_factory else {
                return Err(TransportError::Unsupported(format!(
                    "connector '{}' has no receiver factory",
                    self.name()
                )));
            };

            let context = ReceiverContext::new(
                self.name(),
                key.clone(),
                endpoint,
                listener,
                Arc::clone(self.metrics()),
            );
            let hooks = factory.create(context.clone())?;
            let receiver = Arc::new(MessageReceiver::new(self, context, hooks));
            receiver.initialise().await?;
            self.receivers.insert(key.clone(), Arc::clone(&receiver));
            receiver
        };
        debug!(connector = %self.name(), receiver = %key, "receiver registered");

        if self.is_started()
            && let Err(e) = receiver.start().await
        {
            self.receivers.remove(&key);
            receiver.dispose().await;
            return Err(e);
        }
        Ok(receiver)
    }
}

fn key_matcher(pattern: &str) -> Option<regex::Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');
    RegexBuilder::new(&expr).case_insensitive(true).build().ok()
}
