//! Minimal message envelope carried through the runtime.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use uuid::Uuid;

use crate::error::TransportResult;

/// A stream of payload chunks.
pub type PayloadStream = Pin<Box<dyn Stream<Item = TransportResult<Bytes>> + Send>>;

/// Message payload: fully buffered, or streamed by the transport.
pub enum MessagePayload {
    /// A buffered payload.
    Bytes(Bytes),
    /// A payload still being read from the transport.
    Stream(PayloadStream),
}

impl fmt::Debug for MessagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A payload plus identifiers and string properties.
#[derive(Debug)]
pub struct TransportMessage {
    /// Unique identifier of the message.
    pub id: Uuid,

    /// Identifier of the message this one answers, if any.
    pub correlation_id: Option<Uuid>,

    /// The payload.
    pub payload: MessagePayload,

    /// Transport-specific properties.
    pub properties: HashMap<String, String>,
}

impl TransportMessage {
    /// Creates a message with a buffered payload and a fresh id.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: None,
            payload: MessagePayload::Bytes(payload.into()),
            properties: HashMap::new(),
        }
    }

    /// Creates a message with a streamed payload and a fresh id.
    pub fn streaming(stream: PayloadStream) -> Self {
        Self {
            id: Uuid::new_v4(),
            correlation_id: None,
            payload: MessagePayload::Stream(stream),
            properties: HashMap::new(),
        }
    }

    /// Creates a reply correlated with this message.
    pub fn reply(&self, payload: impl Into<Bytes>) -> Self {
        Self::new(payload).with_correlation_id(self.id)
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether the payload is streamed.
    pub const fn is_streaming(&self) -> bool {
        matches!(self.payload, MessagePayload::Stream(_))
    }

    /// The buffered payload, or `None` for a streamed one.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.payload {
            MessagePayload::Bytes(bytes) => Some(bytes),
            MessagePayload::Stream(_) => None,
        }
    }

    /// Reads the whole payload, draining a stream if necessary.
    ///
    /// ```
    /// # use bytes::Bytes;
    /// # use turbobus_transport_traits::TransportMessage;
    /// # tokio_test::block_on(async {
    /// let chunks = futures::stream::iter([Ok(Bytes::from("order-")), Ok(Bytes::from("42"))]);
    /// let message = TransportMessage::streaming(Box::pin(chunks));
    /// assert_eq!(message.into_bytes().await?, Bytes::from("order-42"));
    /// # Ok::<(), turbobus_transport_traits::TransportError>(())
    /// # });
    /// ```
    pub async fn into_bytes(self) -> TransportResult<Bytes> {
        match self.payload {
            MessagePayload::Bytes(bytes) => Ok(bytes),
            MessagePayload::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    #[test]
    fn test_reply_correlates() {
        let request = TransportMessage::new("ping").with_property("k", "v");
        let reply = request.reply("pong");
        assert_eq!(reply.correlation_id, Some(request.id));
        assert_ne!(reply.id, request.id);
        assert_eq!(reply.bytes().map(|b| b.as_ref()), Some(&b"pong"[..]));
    }

    #[tokio::test]
    async fn test_into_bytes_drains_stream() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let message = TransportMessage::streaming(Box::pin(chunks));
        assert!(message.is_streaming());
        assert_eq!(message.into_bytes().await.unwrap(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn test_into_bytes_propagates_stream_error() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(TransportError::ReceiveFailed("reset".into())),
        ]);
        let message = TransportMessage::streaming(Box::pin(chunks));
        assert!(message.into_bytes().await.is_err());
    }
}
