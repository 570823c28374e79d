//! Integration tests for [`RedpandaMessageBus`] against a real Kafka-compatible broker.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Order envelopes round-trip through a destination unchanged
//! - One subscription can listen to several destinations
//! - Members of one consumer group share a destination's messages
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take a while to start Kafka:
//! ```bash
//! cargo test -p stockflow-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use std::collections::HashSet;
use std::time::Duration;
use stockflow_core::message::{Confirmation, CorrelationId, Envelope, Message, Order};
use stockflow_core::message_bus::MessageBus;
use stockflow_redpanda::RedpandaMessageBus;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn warmup() -> Envelope {
    Envelope::new("warmup".to_string(), vec![255])
}

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish warmup envelopes until the destination exists and metadata has propagated.
async fn ensure_destination_exists(bus: &RedpandaMessageBus, destination: &str) {
    for attempt in 1..=60 {
        if bus.publish(destination, &warmup()).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create destination {destination}");
    }
}

#[tokio::test]
#[ignore]
async fn order_round_trips_through_destination() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = RedpandaMessageBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create message bus");
    ensure_destination_exists(&bus, "inventory_queue").await;

    let mut stream = bus
        .subscribe(&["inventory_queue"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let order = Order::new(CorrelationId::new(), "item1", 5);
    bus.publish("inventory_queue", &order.to_envelope().expect("encode"))
        .await
        .expect("Failed to publish order");

    let received = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(result) = stream.next().await {
                let envelope = result.expect("Failed to receive envelope");
                if envelope.message_type != "warmup" {
                    return envelope;
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for order");

    assert_eq!(Order::from_envelope(&received).expect("decode"), order);
}

#[tokio::test]
#[ignore]
async fn single_subscription_covers_several_destinations() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = RedpandaMessageBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create message bus");
    ensure_destination_exists(&bus, "inventory_queue").await;
    ensure_destination_exists(&bus, "cart_updates").await;

    let mut stream = bus
        .subscribe(&["inventory_queue", "cart_updates"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let order = Order::new(CorrelationId::new(), "item1", 1);
    let confirmation = Confirmation::accepted(&order, 9);
    bus.publish("inventory_queue", &order.to_envelope().expect("encode"))
        .await
        .expect("Failed to publish order");
    bus.publish("cart_updates", &confirmation.to_envelope().expect("encode"))
        .await
        .expect("Failed to publish confirmation");

    let mut types = HashSet::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while types.len() < 2 {
            if let Some(Ok(envelope)) = stream.next().await {
                if envelope.message_type != "warmup" {
                    types.insert(envelope.message_type);
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");

    assert!(types.contains(Order::MESSAGE_TYPE));
    assert!(types.contains(Confirmation::MESSAGE_TYPE));
}

#[tokio::test]
#[ignore]
async fn consumer_group_members_do_not_share_deliveries() {
    let (_kafka, brokers) = start_kafka().await;

    let bus = RedpandaMessageBus::builder()
        .brokers(&brokers)
        .consumer_group("order-processor")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create message bus");
    ensure_destination_exists(&bus, "shared_orders").await;

    let mut first = bus
        .subscribe(&["shared_orders"])
        .await
        .expect("Failed to subscribe first member");
    let mut second = bus
        .subscribe(&["shared_orders"])
        .await
        .expect("Failed to subscribe second member");
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut sent = HashSet::new();
    for _ in 0..10 {
        let order = Order::new(CorrelationId::new(), "item1", 1);
        sent.insert(order.correlation_id);
        bus.publish("shared_orders", &order.to_envelope().expect("encode"))
            .await
            .expect("Failed to publish order");
    }

    let mut seen_first = HashSet::new();
    let mut seen_second = HashSet::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while seen_first.len() + seen_second.len() < sent.len() {
            tokio::select! {
                Some(Ok(envelope)) = first.next() => {
                    if let Ok(order) = Order::from_envelope(&envelope) {
                        seen_first.insert(order.correlation_id);
                    }
                }
                Some(Ok(envelope)) = second.next() => {
                    if let Ok(order) = Order::from_envelope(&envelope) {
                        seen_second.insert(order.correlation_id);
                    }
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for orders");

    assert!(seen_first.is_disjoint(&seen_second));
    let all: HashSet<_> = seen_first.union(&seen_second).copied().collect();
    assert_eq!(all, sent);
}
