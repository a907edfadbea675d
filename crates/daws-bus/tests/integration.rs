//! Integration tests for the `daws-bus` adapters.
//!
//! The `MemoryBus` tests run everywhere. The `JetStream` tests require a
//! live NATS server with `JetStream` enabled. Run them with:
//!
//! ```bash
//! docker run -d -p 4222:4222 nats:2.10 -js
//! cargo test -p daws-bus -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use daws_bus::{
    JetStreamBus, JetStreamOptions, MemoryBus, MessageBus, RetryPolicy, decode, publish_json,
    topology,
};
use daws_types::{ControllerId, ControllerReport, Domain};

/// NATS URL for the local Docker instance.
const NATS_URL: &str = "nats://localhost:4222";

// =============================================================================
// Topology on the in-memory bus
// =============================================================================

#[tokio::test]
async fn declared_topology_retains_reports_before_coordinator_starts() {
    let bus = MemoryBus::new();
    topology::declare_topology(&bus).await.unwrap();

    let id = ControllerId::new();
    publish_json(&bus, topology::CONTROL_QUEUE, &ControllerReport::join(id, Domain::City))
        .await
        .unwrap();

    let mut sub = bus
        .consume(topology::CONTROL_QUEUE, topology::COORDINATOR_GROUP, 1)
        .await
        .unwrap();
    let delivery = sub.next().await.unwrap();
    let report: ControllerReport = decode(delivery.payload()).unwrap();
    assert_eq!(report.controller_id, id);
    delivery.ack().await.unwrap();
    assert_eq!(
        bus.inspect_depth(topology::CONTROL_QUEUE).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn ticks_broadcast_to_every_controller_group() {
    let bus = MemoryBus::new();
    topology::declare_topology(&bus).await.unwrap();
    let queue = topology::tick_queue(Domain::Traffic);
    let first = topology::controller_group(ControllerId::new());
    let second = topology::controller_group(ControllerId::new());
    bus.declare_group(queue, &first).await.unwrap();
    bus.declare_group(queue, &second).await.unwrap();

    bus.publish(queue, b"tick".to_vec()).await.unwrap();

    for group in [&first, &second] {
        let mut sub = bus.consume(queue, group, 1).await.unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        delivery.ack().await.unwrap();
    }
    assert_eq!(bus.inspect_depth(queue).await.unwrap(), 0);
}

#[tokio::test]
async fn dropped_next_futures_lose_no_delivery() {
    let bus = MemoryBus::new();
    let queue = "daws_test_dropped_next";
    bus.declare_queue(queue).await.unwrap();
    bus.declare_group(queue, "test_workers").await.unwrap();
    let mut sub = bus.consume(queue, "test_workers", 1).await.unwrap();

    for _ in 0..5 {
        let idle = tokio::time::timeout(Duration::from_millis(10), sub.next()).await;
        assert!(idle.is_err());
    }
    bus.publish(queue, b"job".to_vec()).await.unwrap();

    let delivery = tokio::time::timeout(Duration::from_secs(1), sub.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.payload(), b"job");
    assert!(!delivery.redelivered());
    delivery.ack().await.unwrap();
}

// =============================================================================
// JetStream (live)
// =============================================================================

async fn connect_live() -> JetStreamBus {
    JetStreamBus::connect(NATS_URL, &RetryPolicy::never(), JetStreamOptions::default())
        .await
        .expect("Failed to connect to NATS -- is Docker running?")
}

#[tokio::test]
#[ignore = "requires a live NATS server with JetStream"]
async fn jetstream_requeue_and_depth() {
    let bus = connect_live().await;
    let queue = "daws_test_requeue_queue";
    bus.declare_queue(queue).await.unwrap();
    bus.declare_group(queue, "test_workers").await.unwrap();
    bus.purge(queue).await.unwrap();

    bus.publish(queue, b"job".to_vec()).await.unwrap();
    assert_eq!(bus.inspect_depth(queue).await.unwrap(), 1);

    let mut sub = bus.consume(queue, "test_workers", 1).await.unwrap();
    let first = sub.next().await.unwrap();
    assert!(!first.redelivered());
    first.nack(true).await.unwrap();

    let second = sub.next().await.unwrap();
    assert!(second.redelivered());
    second.ack().await.unwrap();

    // Interest retention removes the message once the only group acked it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bus.inspect_depth(queue).await.unwrap(), 0);
    bus.remove_group(queue, "test_workers").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live NATS server with JetStream"]
async fn jetstream_term_drops_message() {
    let bus = connect_live().await;
    let queue = "daws_test_term_queue";
    bus.declare_queue(queue).await.unwrap();
    bus.declare_group(queue, "test_workers").await.unwrap();
    bus.purge(queue).await.unwrap();

    bus.publish(queue, b"poison".to_vec()).await.unwrap();
    let mut sub = bus.consume(queue, "test_workers", 1).await.unwrap();
    sub.next().await.unwrap().nack(false).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bus.inspect_depth(queue).await.unwrap(), 0);
    bus.remove_group(queue, "test_workers").await.unwrap();
}

#[tokio::test]
#[ignore = "requires a live NATS server with JetStream"]
async fn jetstream_next_survives_being_raced_against_a_timer() {
    let bus = connect_live().await;
    let queue = "daws_test_raced_next_queue";
    bus.declare_queue(queue).await.unwrap();
    bus.declare_group(queue, "test_workers").await.unwrap();
    bus.purge(queue).await.unwrap();

    let mut sub = bus.consume(queue, "test_workers", 1).await.unwrap();
    let publisher = async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        bus.publish(queue, b"job".to_vec()).await.unwrap();
    };
    let consumer = async {
        loop {
            if let Ok(next) = tokio::time::timeout(Duration::from_millis(20), sub.next()).await {
                return next.unwrap();
            }
        }
    };
    let ((), delivery) = tokio::join!(publisher, consumer);

    // A delivery stranded in a dropped request would only come back after
    // `ack_wait`, marked as redelivered.
    assert!(!delivery.redelivered());
    delivery.ack().await.unwrap();
    bus.remove_group(queue, "test_workers").await.unwrap();
}
