//! Pooled dispatch, send and request.
//!
//! Each call borrows one instance keyed by endpoint and always gives it
//! back. A streamed response keeps its instance borrowed until the stream
//! ends or is dropped.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tracing::trace;

use super::{Connector, ConnectorInner};
use crate::core::{
    AtomicMetrics, Endpoint, EndpointKey, MessagePayload, PayloadStream, TransportError,
    TransportMessage, TransportResult,
};
use crate::pool::{KeyedPool, PoolStats, PooledObject};

pin_project! {
    /// Payload stream that holds a pooled instance until it is exhausted.
    struct PooledStream<G> {
        #[pin]
        inner: PayloadStream,
        guard: Option<G>,
    }
}

impl<G> Stream for PooledStream<G> {
    type Item = TransportResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let next = ready!(this.inner.poll_next(cx));
        if next.is_none() && this.guard.take().is_some() {
            trace!("streamed response drained, instance returned");
        }
        Poll::Ready(next)
    }
}

/// Ties `guard` to a streamed payload; hands it back for a buffered one.
fn hold_until_drained<G>(message: &mut TransportMessage, guard: G) -> Option<G>
where
    G: Send + 'static,
{
    match std::mem::replace(&mut message.payload, MessagePayload::Bytes(Bytes::new())) {
        MessagePayload::Stream(inner) => {
            message.payload = MessagePayload::Stream(Box::pin(PooledStream {
                inner,
                guard: Some(guard),
            }));
            None
        }
        payload => {
            message.payload = payload;
            Some(guard)
        }
    }
}

impl ConnectorInner {
    async fn borrow_for<V>(
        &self,
        pool: &KeyedPool<EndpointKey, V>,
        endpoint: &Arc<Endpoint>,
    ) -> TransportResult<PooledObject<EndpointKey, V>>
    where
        V: Send + Sync + 'static,
    {
        self.check_endpoint(endpoint)?;
        match pool.borrow(&endpoint.key()).await {
            Ok(instance) => {
                AtomicMetrics::incr(&self.metrics().pool_borrows);
                Ok(instance)
            }
            Err(e) => {
                if matches!(e, TransportError::PoolExhausted { .. }) {
                    AtomicMetrics::incr(&self.metrics().pool_exhaustions);
                }
                Err(TransportError::dispatch(endpoint.address(), e))
            }
        }
    }
}

impl Connector {
    /// Sends `message` to `endpoint` without waiting for a response.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::Disposed`] or
    /// [`TransportError::UnsupportedProtocol`] before borrowing, and with a
    /// [`TransportError::Dispatch`] wrapping pool or transport failures.
    pub async fn dispatch(
        &self,
        endpoint: &Arc<Endpoint>,
        message: TransportMessage,
    ) -> TransportResult<()> {
        let inner = &self.inner;
        let dispatcher = inner.borrow_for(&inner.dispatchers, endpoint).await?;
        let result = dispatcher.dispatch(message).await;
        dispatcher.release().await;

        match result {
            Ok(()) => {
                AtomicMetrics::incr(&inner.metrics().dispatches);
                Ok(())
            }
            Err(e) => Err(TransportError::dispatch(endpoint.address(), e)),
        }
    }

    /// Sends `message` to `endpoint` and waits for the response.
    ///
    /// A streamed response keeps the dispatcher borrowed until the stream is
    /// drained or dropped.
    pub async fn send(
        &self,
        endpoint: &Arc<Endpoint>,
        message: TransportMessage,
    ) -> TransportResult<TransportMessage> {
        let inner = &self.inner;
        let dispatcher = inner.borrow_for(&inner.dispatchers, endpoint).await?;
        match dispatcher.send(message).await {
            Ok(mut response) => {
                AtomicMetrics::incr(&inner.metrics().sends);
                if let Some(dispatcher) = hold_until_drained(&mut response, dispatcher) {
                    dispatcher.release().await;
                }
                Ok(response)
            }
            Err(e) => {
                dispatcher.release().await;
                Err(TransportError::dispatch(endpoint.address(), e))
            }
        }
    }

    /// Reads one message from `endpoint`, waiting at most `timeout`.
    pub async fn request(
        &self,
        endpoint: &Arc<Endpoint>,
        timeout: Duration,
    ) -> TransportResult<Option<TransportMessage>> {
        let inner = &self.inner;
        let requester = inner.borrow_for(&inner.requesters, endpoint).await?;
        match requester.request(timeout).await {
            Ok(Some(mut message)) => {
                AtomicMetrics::incr(&inner.metrics().requests);
                if let Some(requester) = hold_until_drained(&mut message, requester) {
                    requester.release().await;
                }
                Ok(Some(message))
            }
            Ok(None) => {
                AtomicMetrics::incr(&inner.metrics().requests);
                requester.release().await;
                Ok(None)
            }
            Err(e) => {
                requester.release().await;
                Err(TransportError::dispatch(endpoint.address(), e))
            }
        }
    }

    /// Per-endpoint dispatcher limit.
    pub fn max_dispatchers_active(&self) -> usize {
        self.inner.dispatchers.max_active()
    }

    /// Changes the per-endpoint dispatcher limit; idle and total limits follow.
    pub fn set_max_dispatchers_active(&self, max_active: usize) {
        self.inner.dispatchers.set_max_active(max_active);
    }

    /// Per-endpoint requester limit.
    pub fn max_requesters_active(&self) -> usize {
        self.inner.requesters.max_active()
    }

    /// Changes the per-endpoint requester limit; idle and total limits follow.
    pub fn set_max_requesters_active(&self, max_active: usize) {
        self.inner.requesters.set_max_active(max_active);
    }

    /// Occupancy of the dispatcher pool.
    pub fn dispatcher_pool_stats(&self) -> PoolStats {
        self.inner.dispatchers.stats()
    }

    /// Occupancy of the requester pool.
    pub fn requester_pool_stats(&self) -> PoolStats {
        self.inner.requesters.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(Arc<AtomicBool>);

    impl Drop for Flag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_streamed_payload_holds_guard_until_drained() {
        let released = Arc::new(AtomicBool::new(false));
        let chunks = futures::stream::iter(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]);
        let mut message = TransportMessage::streaming(Box::pin(chunks));

        assert!(hold_until_drained(&mut message, Flag(Arc::clone(&released))).is_none());
        let MessagePayload::Stream(mut stream) = message.payload else {
            panic!("payload should still be streamed");
        };
        assert!(stream.next().await.is_some());
        assert!(!released.load(Ordering::SeqCst));
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_buffered_payload_returns_guard() {
        let released = Arc::new(AtomicBool::new(false));
        let mut message = TransportMessage::new("done");
        let guard = hold_until_drained(&mut message, Flag(Arc::clone(&released)));
        assert!(guard.is_some());
        assert_eq!(message.bytes().map(|b| b.as_ref()), Some(&b"done"[..]));
    }
}
