//! Lifecycle transitions of connectors and their receivers.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{Broker, Collector, Harness, HookCounters, MockHooks};
use pretty_assertions::assert_eq;
use turbobus_transport::{
    ConnectableHooks, ConnectionState, Connector, LifecycleState, TransportError, TransportResult,
};

fn connector_with(counters: &Arc<HookCounters>) -> Connector {
    Connector::builder("vm", "vm")
        .hooks(Arc::new(MockHooks::new(Arc::clone(counters))))
        .exception_listener(common::Faults::new())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_stop_and_dispose_are_idempotent() {
    let counters = HookCounters::new();
    let connector = connector_with(&counters);
    connector.start().await.unwrap();

    connector.stop().await;
    connector.stop().await;
    assert_eq!(connector.lifecycle_state(), LifecycleState::Stopped);

    connector.dispose().await;
    connector.dispose().await;
    assert_eq!(connector.lifecycle_state(), LifecycleState::Disposed);

    assert_eq!(HookCounters::get(&counters.starts), 1);
    assert_eq!(HookCounters::get(&counters.stops), 1);
    assert_eq!(HookCounters::get(&counters.disposes), 1);
    assert_eq!(HookCounters::get(&counters.disconnects), 1);
}

#[tokio::test]
async fn test_stop_disconnects_and_start_reconnects() {
    let counters = HookCounters::new();
    let connector = connector_with(&counters);
    connector.start().await.unwrap();

    connector.stop().await;
    assert_eq!(connector.connection_state(), ConnectionState::Disconnected);

    connector.start().await.unwrap();
    assert!(connector.is_started());
    assert_eq!(HookCounters::get(&counters.connects), 2);
    assert_eq!(HookCounters::get(&counters.starts), 2);
    connector.dispose().await;
}

#[tokio::test]
async fn test_start_on_unconnected_connector_connects_first() {
    let counters = HookCounters::new();
    let connector = connector_with(&counters);
    assert_eq!(connector.lifecycle_state(), LifecycleState::NotInitialised);

    connector.start().await.unwrap();

    assert_eq!(connector.lifecycle_state(), LifecycleState::Started);
    assert_eq!(connector.connection_state(), ConnectionState::Connected);
    assert_eq!(HookCounters::get(&counters.connects), 1);
    connector.dispose().await;
}

#[tokio::test]
async fn test_failed_connect_leaves_connector_unstarted() {
    let counters = HookCounters::new();
    counters.refuse_connects.store(true, Ordering::SeqCst);
    let connector = connector_with(&counters);

    let result = connector.start().await;

    assert!(matches!(result, Err(TransportError::Connect { .. })));
    assert!(!connector.is_started());
    assert_eq!(connector.connection_state(), ConnectionState::Disconnected);
    assert_eq!(HookCounters::get(&counters.starts), 0);
    assert_eq!(connector.metrics().failed_connects, 1);
}

#[tokio::test]
async fn test_second_initialise_is_rejected() {
    let connector = connector_with(&HookCounters::new());
    connector.initialise().await.unwrap();
    assert!(matches!(
        connector.initialise().await,
        Err(TransportError::AlreadyInitialised(_))
    ));
}

#[tokio::test]
async fn test_disposed_connector_refuses_to_start() {
    let connector = connector_with(&HookCounters::new());
    connector.dispose().await;

    assert!(matches!(connector.start().await, Err(TransportError::Disposed(_))));
    assert!(matches!(connector.connect().await, Err(TransportError::Disposed(_))));
}

#[tokio::test]
async fn test_disconnect_stops_and_connect_restarts() {
    let broker = Broker::new();
    let harness = Harness::new(&broker);
    let connector = &harness.connector;
    let receiver = connector
        .register_listener(Collector::new(), common::endpoint("vm://orders"))
        .await
        .unwrap();
    connector.start().await.unwrap();

    connector.disconnect().await.unwrap();
    assert!(!connector.is_connected());
    assert!(!connector.is_started());
    assert!(!receiver.is_connected());
    assert_eq!(receiver.lifecycle_state(), LifecycleState::Stopped);

    connector.connect().await.unwrap();
    assert!(connector.is_started());
    assert!(receiver.is_started());

    let counters = harness.receivers.counters("vm://orders");
    assert_eq!(HookCounters::get(&counters.connects), 2);
    assert_eq!(HookCounters::get(&counters.disconnects), 1);
    connector.dispose().await;
}

#[tokio::test]
async fn test_failing_receiver_fails_connector_start() {
    let broker = Broker::new();
    let harness = Harness::new(&broker);
    let connector = &harness.connector;
    let failing = HookCounters::new();
    failing.refuse_connects.store(true, Ordering::SeqCst);
    harness.receivers.prepare("vm://broken", failing);

    let healthy = connector
        .register_listener(Collector::new(), common::endpoint("vm://healthy"))
        .await
        .unwrap();
    let broken = connector
        .register_listener(Collector::new(), common::endpoint("vm://broken"))
        .await
        .unwrap();

    let result = connector.start().await;

    assert!(result.is_err());
    assert!(!connector.is_started());
    assert!(!broken.is_started());
    // the other receiver is still started
    assert!(healthy.is_started());
    connector.dispose().await;
    assert_eq!(healthy.lifecycle_state(), LifecycleState::Disposed);
}

#[tokio::test]
async fn test_dispose_without_start_disposes_receivers() {
    let broker = Broker::new();
    let harness = Harness::new(&broker);
    harness
        .connector
        .register_listener(Collector::new(), common::endpoint("vm://orders"))
        .await
        .unwrap();

    harness.connector.dispose().await;

    let counters = harness.receivers.counters("vm://orders");
    assert_eq!(HookCounters::get(&counters.connects), 0);
    assert_eq!(HookCounters::get(&counters.stops), 0);
    assert_eq!(HookCounters::get(&counters.disposes), 1);
}

/// Hooks whose connect takes a while and which notice a start on a dead link.
#[derive(Debug, Default)]
struct SlowLink {
    up: AtomicBool,
    connects: AtomicU32,
    starts: AtomicU32,
    starts_while_down: AtomicU32,
}

#[async_trait]
impl ConnectableHooks for SlowLink {
    async fn do_connect(&self) -> TransportResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn do_disconnect(&self) -> TransportResult<()> {
        self.up.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn do_start(&self) -> TransportResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.up.load(Ordering::SeqCst) {
            self.starts_while_down.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

fn slow_connector(link: &Arc<SlowLink>) -> Connector {
    Connector::builder("vm", "vm")
        .hooks(Arc::clone(link) as _)
        .exception_listener(common::Faults::new())
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_connects_share_one_attempt() {
    let link = Arc::new(SlowLink::default());
    let connector = slow_connector(&link);

    let first = {
        let connector = connector.clone();
        tokio::spawn(async move {
            connector.connect().await.unwrap();
            connector.is_connected()
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = {
        let connector = connector.clone();
        tokio::spawn(async move {
            connector.connect().await.unwrap();
            connector.is_connected()
        })
    };

    assert!(second.await.unwrap(), "second caller returned before the link was up");
    assert!(first.await.unwrap());
    assert_eq!(link.connects.load(Ordering::SeqCst), 1);
    connector.dispose().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_start_waits_for_in_flight_connect() {
    let link = Arc::new(SlowLink::default());
    let connector = slow_connector(&link);

    let connecting = {
        let connector = connector.clone();
        tokio::spawn(async move { connector.connect().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    connector.start().await.unwrap();
    assert!(connector.is_connected());
    assert_eq!(connector.lifecycle_state(), LifecycleState::Started);
    connecting.await.unwrap().unwrap();

    assert_eq!(link.connects.load(Ordering::SeqCst), 1);
    assert_eq!(link.starts.load(Ordering::SeqCst), 1);
    assert_eq!(link.starts_while_down.load(Ordering::SeqCst), 0);
    connector.dispose().await;
}
