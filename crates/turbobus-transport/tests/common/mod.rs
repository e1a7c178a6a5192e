//! In-memory transport used by the integration tests.
//!
//! A [`Broker`] holds named queues. Mock receivers poll them, mock
//! dispatchers push to them and mock requesters read from them. Every mock
//! counts its hook calls so tests can assert on exact lifecycle traffic.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use turbobus_transport::{
    ConnectableHooks, Connector, ConnectorConfig, DispatcherFactory, DispatcherHooks, Endpoint,
    ExceptionListener, MessageListener, PollingConfig, ReceiveMode, ReceiverContext,
    ReceiverFactory, ReceiverHooks, RequesterFactory, RequesterHooks, TransportError,
    TransportMessage, TransportResult,
};

/// Named in-memory queues.
#[derive(Debug, Default)]
pub struct Broker {
    queues: Mutex<HashMap<String, VecDeque<TransportMessage>>>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, address: &str, message: TransportMessage) {
        self.queues
            .lock()
            .entry(address.to_string())
            .or_default()
            .push_back(message);
    }

    pub fn push_text(&self, address: &str, text: &'static str) {
        self.push(address, TransportMessage::new(text));
    }

    pub fn pop(&self, address: &str) -> Option<TransportMessage> {
        self.queues.lock().get_mut(address)?.pop_front()
    }

    pub fn drain(&self, address: &str, max: usize) -> Vec<TransportMessage> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(address) else {
            return Vec::new();
        };
        let n = queue.len().min(max);
        queue.drain(..n).collect()
    }

    pub fn len(&self, address: &str) -> usize {
        self.queues.lock().get(address).map_or(0, VecDeque::len)
    }
}

/// Hook call counters of one mock connectable.
#[derive(Debug, Default)]
pub struct HookCounters {
    pub connects: AtomicU32,
    pub disconnects: AtomicU32,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub disposes: AtomicU32,
    pub validations: AtomicU32,
    /// Connect attempts left to fail.
    pub fail_connects: AtomicU32,
    /// Fail every connect attempt.
    pub refuse_connects: AtomicBool,
    /// Connection validations left to fail.
    pub fail_validations: AtomicU32,
    /// Veto reuse of pooled instances.
    pub invalid: AtomicBool,
}

impl HookCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(times: u32) -> Arc<Self> {
        let counters = Self::default();
        counters.fail_connects.store(times, Ordering::SeqCst);
        Arc::new(counters)
    }

    pub fn get(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }
}

/// Connectable hooks backed by [`HookCounters`].
#[derive(Debug, Clone)]
pub struct MockHooks {
    pub counters: Arc<HookCounters>,
}

impl MockHooks {
    pub fn new(counters: Arc<HookCounters>) -> Self {
        Self { counters }
    }
}

#[async_trait]
impl ConnectableHooks for MockHooks {
    async fn do_connect(&self) -> TransportResult<()> {
        let c = &self.counters;
        c.connects.fetch_add(1, Ordering::SeqCst);
        if c.refuse_connects.load(Ordering::SeqCst) {
            return Err(TransportError::connect("connection refused"));
        }
        let failed = c
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::connect("connection refused"));
        }
        Ok(())
    }

    async fn do_disconnect(&self) -> TransportResult<()> {
        self.counters.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn do_start(&self) -> TransportResult<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn do_stop(&self) -> TransportResult<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn do_dispose(&self) -> TransportResult<()> {
        self.counters.disposes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn validate_connection(&self) -> TransportResult<()> {
        let c = &self.counters;
        c.validations.fetch_add(1, Ordering::SeqCst);
        let failed = c
            .fail_validations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(TransportError::connect("stale session"));
        }
        Ok(())
    }

    fn validate(&self) -> bool {
        !self.counters.invalid.load(Ordering::SeqCst)
    }
}

/// Tracks how many calls are in flight at once.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

/// Receiver polling a broker queue named after its endpoint address.
#[derive(Debug)]
pub struct MockReceiver {
    hooks: MockHooks,
    broker: Arc<Broker>,
    address: String,
    mode: ReceiveMode,
    poll_delay: Duration,
    polls: Arc<Gauge>,
    fail_polls: Arc<AtomicU32>,
    routed: Arc<Mutex<Vec<TransportMessage>>>,
}

#[async_trait]
impl ConnectableHooks for MockReceiver {
    async fn do_connect(&self) -> TransportResult<()> {
        self.hooks.do_connect().await
    }

    async fn do_disconnect(&self) -> TransportResult<()> {
        self.hooks.do_disconnect().await
    }

    async fn do_start(&self) -> TransportResult<()> {
        self.hooks.do_start().await
    }

    async fn do_stop(&self) -> TransportResult<()> {
        self.hooks.do_stop().await
    }

    async fn do_dispose(&self) -> TransportResult<()> {
        self.hooks.do_dispose().await
    }

    async fn validate_connection(&self) -> TransportResult<()> {
        self.hooks.validate_connection().await
    }
}

#[async_trait]
impl ReceiverHooks for MockReceiver {
    fn receive_mode(&self) -> ReceiveMode {
        self.mode
    }

    async fn get_messages(&self) -> TransportResult<Vec<TransportMessage>> {
        self.polls.enter();
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let failed = self
            .fail_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        self.polls.exit();
        if failed {
            return Err(TransportError::connect("queue went away"));
        }
        Ok(self.broker.drain(&self.address, 10))
    }

    async fn on_routed(&self, response: TransportMessage) -> TransportResult<()> {
        self.routed.lock().push(response);
        Ok(())
    }
}

/// Creates [`MockReceiver`]s and keeps their counters by receiver key.
#[derive(Debug)]
pub struct MockReceiverFactory {
    broker: Arc<Broker>,
    pub mode: ReceiveMode,
    pub poll_delay: Duration,
    pub polls: Arc<Gauge>,
    pub fail_polls: Arc<AtomicU32>,
    pub routed: Arc<Mutex<Vec<TransportMessage>>>,
    counters: Mutex<HashMap<String, Arc<HookCounters>>>,
    prepared: Mutex<HashMap<String, Arc<HookCounters>>>,
}

impl MockReceiverFactory {
    pub fn new(broker: Arc<Broker>, mode: ReceiveMode) -> Self {
        Self {
            broker,
            mode,
            poll_delay: Duration::ZERO,
            polls: Arc::new(Gauge::default()),
            fail_polls: Arc::new(AtomicU32::new(0)),
            routed: Arc::new(Mutex::new(Vec::new())),
            counters: Mutex::new(HashMap::new()),
            prepared: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Uses `counters` for the receiver created under `key`.
    pub fn prepare(&self, key: &str, counters: Arc<HookCounters>) {
        self.prepared.lock().insert(key.to_string(), counters);
    }

    pub fn counters(&self, key: &str) -> Arc<HookCounters> {
        self.counters
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("no receiver created for {key}"))
    }
}

impl ReceiverFactory for MockReceiverFactory {
    fn create(&self, context: ReceiverContext) -> TransportResult<Arc<dyn ReceiverHooks>> {
        let key = context.key().to_string();
        let counters = self
            .prepared
            .lock()
            .remove(&key)
            .unwrap_or_else(HookCounters::new);
        self.counters.lock().insert(key, Arc::clone(&counters));
        Ok(Arc::new(MockReceiver {
            hooks: MockHooks::new(counters),
            broker: Arc::clone(&self.broker),
            address: context.endpoint().address().to_string(),
            mode: self.mode,
            poll_delay: self.poll_delay,
            polls: Arc::clone(&self.polls),
            fail_polls: Arc::clone(&self.fail_polls),
            routed: Arc::clone(&self.routed),
        }))
    }
}

/// Dispatcher pushing to the broker queue of its endpoint.
#[derive(Debug)]
pub struct MockDispatcher {
    hooks: MockHooks,
    broker: Arc<Broker>,
    address: String,
    delay: Duration,
    gauge: Arc<Gauge>,
}

#[async_trait]
impl ConnectableHooks for MockDispatcher {
    async fn do_connect(&self) -> TransportResult<()> {
        self.hooks.do_connect().await
    }

    async fn do_disconnect(&self) -> TransportResult<()> {
        self.hooks.do_disconnect().await
    }

    async fn do_start(&self) -> TransportResult<()> {
        self.hooks.do_start().await
    }

    async fn do_stop(&self) -> TransportResult<()> {
        self.hooks.do_stop().await
    }

    async fn do_dispose(&self) -> TransportResult<()> {
        self.hooks.do_dispose().await
    }

    async fn validate_connection(&self) -> TransportResult<()> {
        self.hooks.validate_connection().await
    }

    fn validate(&self) -> bool {
        self.hooks.validate()
    }
}

#[async_trait]
impl DispatcherHooks for MockDispatcher {
    async fn do_dispatch(&self, message: TransportMessage) -> TransportResult<()> {
        self.gauge.enter();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.broker.push(&self.address, message);
        self.gauge.exit();
        Ok(())
    }

    async fn do_send(&self, message: TransportMessage) -> TransportResult<TransportMessage> {
        self.gauge.enter();
        let response = if message.properties.contains_key("stream") {
            let chunks = futures::stream::iter(vec![
                Ok(Bytes::from_static(b"chunk-1 ")),
                Ok(Bytes::from_static(b"chunk-2")),
            ]);
            TransportMessage::streaming(Box::pin(chunks)).with_correlation_id(message.id)
        } else {
            message.reply("ack")
        };
        self.gauge.exit();
        Ok(response)
    }
}

/// Creates [`MockDispatcher`]s sharing one gauge.
#[derive(Debug)]
pub struct MockDispatcherFactory {
    broker: Arc<Broker>,
    pub delay: Duration,
    pub gauge: Arc<Gauge>,
    pub created: Mutex<Vec<Arc<HookCounters>>>,
    pub invalid: Arc<AtomicBool>,
}

impl MockDispatcherFactory {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            delay: Duration::ZERO,
            gauge: Arc::new(Gauge::default()),
            created: Mutex::new(Vec::new()),
            invalid: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }
}

impl DispatcherFactory for MockDispatcherFactory {
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn DispatcherHooks>> {
        let counters = HookCounters::new();
        if self.invalid.load(Ordering::SeqCst) {
            counters.invalid.store(true, Ordering::SeqCst);
        }
        self.created.lock().push(Arc::clone(&counters));
        Ok(Arc::new(MockDispatcher {
            hooks: MockHooks::new(counters),
            broker: Arc::clone(&self.broker),
            address: endpoint.address().to_string(),
            delay: self.delay,
            gauge: Arc::clone(&self.gauge),
        }))
    }
}

/// Requester reading from the broker queue of its endpoint.
#[derive(Debug)]
pub struct MockRequester {
    hooks: MockHooks,
    broker: Arc<Broker>,
    address: String,
}

#[async_trait]
impl ConnectableHooks for MockRequester {
    async fn do_connect(&self) -> TransportResult<()> {
        self.hooks.do_connect().await
    }
}

#[async_trait]
impl RequesterHooks for MockRequester {
    async fn do_request(&self, _timeout: Duration) -> TransportResult<Option<TransportMessage>> {
        Ok(self.broker.pop(&self.address))
    }
}

#[derive(Debug)]
pub struct MockRequesterFactory {
    broker: Arc<Broker>,
}

impl MockRequesterFactory {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self { broker }
    }
}

impl RequesterFactory for MockRequesterFactory {
    fn create(&self, endpoint: Arc<Endpoint>) -> TransportResult<Arc<dyn RequesterHooks>> {
        Ok(Arc::new(MockRequester {
            hooks: MockHooks::new(HookCounters::new()),
            broker: Arc::clone(&self.broker),
            address: endpoint.address().to_string(),
        }))
    }
}

/// Records the payload of every routed message.
#[derive(Debug, Default)]
pub struct Collector {
    received: Mutex<Vec<Bytes>>,
    reply: bool,
}

impl Collector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replying() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            reply: true,
        })
    }

    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }

    /// Waits until at least `n` messages were routed.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.count() >= n
    }
}

#[async_trait]
impl MessageListener for Collector {
    async fn on_message(
        &self,
        message: TransportMessage,
    ) -> TransportResult<Option<TransportMessage>> {
        let id = message.id;
        let payload = message.into_bytes().await?;
        self.received.lock().push(payload);
        Ok(self
            .reply
            .then(|| TransportMessage::new("reply").with_correlation_id(id)))
    }
}

/// Records forwarded faults.
#[derive(Debug, Default)]
pub struct Faults {
    errors: Mutex<Vec<TransportError>>,
}

impl Faults {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn errors(&self) -> Vec<TransportError> {
        self.errors.lock().clone()
    }
}

impl ExceptionListener for Faults {
    fn exception_thrown(&self, error: &TransportError) {
        self.errors.lock().push(error.clone());
    }
}

pub fn endpoint(address: &str) -> Endpoint {
    Endpoint::parse(address).expect("valid endpoint address")
}

/// Fast polling so tests do not wait on the one second default.
pub fn fast_config() -> ConnectorConfig {
    ConnectorConfig::builder()
        .polling(PollingConfig::every(Duration::from_millis(10)))
        .work_shutdown(Duration::from_millis(500), Duration::from_millis(5))
        .build()
        .expect("valid test config")
}

/// A polling connector over `broker` with mock factories.
pub struct Harness {
    pub connector: Connector,
    pub receivers: Arc<MockReceiverFactory>,
    pub dispatchers: Arc<MockDispatcherFactory>,
    pub faults: Arc<Faults>,
}

impl Harness {
    pub fn new(broker: &Arc<Broker>) -> Self {
        Self::with(
            broker,
            fast_config(),
            MockReceiverFactory::new(Arc::clone(broker), ReceiveMode::Polling),
            MockDispatcherFactory::new(Arc::clone(broker)),
        )
    }

    pub fn with(
        broker: &Arc<Broker>,
        config: ConnectorConfig,
        receivers: MockReceiverFactory,
        dispatchers: MockDispatcherFactory,
    ) -> Self {
        let receivers = Arc::new(receivers);
        let dispatchers = Arc::new(dispatchers);
        let faults = Faults::new();
        let connector = Connector::builder("vm", "vm")
            .config(config)
            .receiver_factory(Arc::clone(&receivers) as Arc<dyn ReceiverFactory>)
            .dispatcher_factory(Arc::clone(&dispatchers) as Arc<dyn DispatcherFactory>)
            .requester_factory(Arc::new(MockRequesterFactory::new(Arc::clone(broker))))
            .exception_listener(Arc::clone(&faults) as Arc<dyn ExceptionListener>)
            .build()
            .expect("connector builds");
        Self {
            connector,
            receivers,
            dispatchers,
            faults,
        }
    }
}
