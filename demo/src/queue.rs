//! A toy `vm://` transport: named queues living in process memory.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use turbobus_transport::{
    ConnectableHooks, DispatcherFactory, DispatcherHooks, Endpoint, ReceiveMode, ReceiverContext,
    ReceiverFactory, ReceiverHooks, RequesterFactory, RequesterHooks, TransportMessage,
    TransportResult,
};

/// Largest batch a receiver takes per poll.
const BATCH: usize = 16;

#[derive(Debug, Default)]
pub struct Queues {
    queues: Mutex<HashMap<String, VecDeque<TransportMessage>>>,
}

impl Queues {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, address: &str, message: TransportMessage) {
        self.queues
            .lock()
            .entry(address.to_string())
            .or_default()
            .push_back(message);
    }

    fn pop(&self, address: &str) -> Option<TransportMessage> {
        self.queues.lock().get_mut(address)?.pop_front()
    }

    fn take(&self, address: &str) -> Vec<TransportMessage> {
        let mut queues = self.queues.lock();
        match queues.get_mut(address) {
            Some(queue) => {
                let n = queue.len().min(BATCH);
                queue.drain(..n).collect()
            }
            None => Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    queues: Arc<Queues>,
    address: String,
}

#[async_trait]
impl ConnectableHooks for QueueReceiver {
    async fn do_connect(&self) -> TransportResult<()> {
        debug!(queue = %self.address, "receiver attached");
        Ok(())
    }
}

#[async_trait]
impl ReceiverHooks for QueueReceiver {
    fn receive_mode(&self) -> ReceiveMode {
        ReceiveMode::Polling
    }

    async fn get_messages(&self) -> TransportResult<Vec<TransportMessage>> {
        Ok(self.queues.take(&self.address))
    }

    async fn on_routed(&self, response: TransportMessage) -> TransportResult<()> {
        self.queues.push(&format!("{}.replies", self.address), response);
        Ok(())
    }
}

#[derive(Debug)]
pub struct QueueDispatcher {
    queues: Arc<Queues>,
    address: String,
}

#[async_trait]
impl ConnectableHooks for QueueDispatcher {}

#[async_trait]
impl DispatcherHooks for QueueDispatcher {
    async fn do_dispatch(&self, message: TransportMessage) -> TransportResult<()> {
        self.queues.push(&self.address, message);
        Ok(())
    }

    async fn do_send(&self, message: TransportMessage) -> TransportResult<TransportMessage> {
        let size = message.bytes().map_or(0, |b| b.len());
        Ok(message.reply(format!("accepted {size} bytes")))
    }
}

#[derive(Debug)]
pub struct QueueRequester {
    queues: Arc<Queues>,
    address: String,
}

#[async_trait]
impl ConnectableHooks for QueueRequester {}

#[async_trait]
impl RequesterHooks for QueueRequester {
    async fn do_request(&self, timeout: Duration) -> TransportResult<Option<TransportMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.queues.pop(&self.address) {
                return Ok(Some(message));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Creates every role of the transport over one set of queues.
#[derive(Debug, Clone)]
pub struct QueueTransport {
    queues: Arc<Queues>,
}

impl QueueTransport {
    pub fn new(queues: Arc<Queues>) -> Self {
        Self { queues }
    }
}

impl ReceiverFactory for QueueTransport {
    fn create(&self, context: ReceiverContext) -> TransportResult<Arc<dyn ReceiverHooks>> {
        Ok(Arc::new(QueueReceiver {
            queues: Arc::clone(&self.queues),
            address: context.endpoint().address().to_string(),
        }))
    }
}

impl DispatcherFactory for QueueTransport {
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn DispatcherHooks>> {
        Ok(Arc::new(QueueDispatcher {
            queues: Arc::clone(&self.queues),
            address: endpoint.address().to_string(),
        }))
    }
}

impl RequesterFactory for QueueTransport {
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn RequesterHooks>> {
        Ok(Arc::new(QueueRequester {
            queues: Arc::clone(&self.queues),
            address: endpoint.address().to_string(),
        }))
    }
}
