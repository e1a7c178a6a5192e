//! TurboBus demo: a connector over in-memory queues.
//!
//! Orders dispatched to `vm://orders` are polled back by a receiver, routed
//! to a listener that answers each one, and the answers are read through a
//! requester. Connector events are printed on shutdown.
//!
//! ```text
//! RUST_LOG=turbobus_transport=debug cargo run -p turbobus-demo
//! ```

mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};
use turbobus_transport::{
    Connector, ConnectorConfig, Endpoint, ExceptionListener, ExchangePattern, LoggingConfig,
    MessageListener, PollingConfig, RetryPolicyConfig, TransportError, TransportMessage,
    TransportResult,
};

use queue::{QueueTransport, Queues};

const ORDERS: usize = 5;

#[derive(Debug, Default)]
struct OrderDesk {
    handled: AtomicUsize,
}

#[async_trait]
impl MessageListener for OrderDesk {
    async fn on_message(&self, message: TransportMessage) -> TransportResult<Option<TransportMessage>> {
        let n = self.handled.fetch_add(1, Ordering::SeqCst) + 1;
        let body = message.bytes().cloned().unwrap_or_default();
        info!(order = %String::from_utf8_lossy(&body), n, "order received");
        Ok(Some(message.reply(format!("confirmed #{n}"))))
    }
}

#[derive(Debug)]
struct LogFaults;

impl ExceptionListener for LogFaults {
    fn exception_thrown(&self, error: &TransportError) {
        warn!(%error, "connector fault");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = LoggingConfig::stderr("info").init()?;

    let config = ConnectorConfig::builder()
        .polling(PollingConfig::every(Duration::from_millis(50)))
        .retry_policy(RetryPolicyConfig::simple(3, Duration::from_millis(200)))
        .max_dispatchers_active(4)
        .build()?;

    let transport = Arc::new(QueueTransport::new(Queues::new()));
    let (connector, mut events) = Connector::builder("memory", "vm")
        .config(config)
        .receiver_factory(Arc::clone(&transport) as _)
        .dispatcher_factory(Arc::clone(&transport) as _)
        .requester_factory(transport as _)
        .exception_listener(Arc::new(LogFaults))
        .build_with_events()?;

    let desk = Arc::new(OrderDesk::default());
    let orders = Endpoint::parse("vm://orders")?.with_exchange_pattern(ExchangePattern::RequestResponse);
    connector
        .register_listener(Arc::clone(&desk) as _, orders)
        .await?;
    connector.start().await.context("starting connector")?;

    let outbound = Arc::new(Endpoint::parse("vm://orders")?);
    for n in 1..=ORDERS {
        connector
            .dispatch(&outbound, TransportMessage::new(format!("order-{n}")))
            .await?;
    }

    let replies = Arc::new(Endpoint::parse("vm://orders.replies")?);
    let mut confirmed = 0;
    while confirmed < ORDERS {
        match connector.request(&replies, Duration::from_secs(2)).await? {
            Some(reply) => {
                confirmed += 1;
                let body = reply.into_bytes().await?;
                info!(reply = %String::from_utf8_lossy(&body), "reply read");
            }
            None => {
                warn!(confirmed, "gave up waiting for replies");
                break;
            }
        }
    }

    let ack = connector
        .send(&outbound, TransportMessage::new("ping"))
        .await?
        .into_bytes()
        .await?;
    info!(ack = %String::from_utf8_lossy(&ack), "send answered");

    info!(metrics = ?connector.metrics(), pools = ?connector.dispatcher_pool_stats(), "before shutdown");
    connector.dispose().await;

    while let Ok(notification) = events.try_recv() {
        info!(at = %notification.timestamp, event = ?notification.event, "event");
    }
    info!(handled = desk.handled.load(Ordering::SeqCst), "done");
    Ok(())
}
