//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round-trip with key and headers
//! - Redelivery of uncommitted messages to the next subscription
//! - Resumption after the last committed offset
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p album-store-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use album_store_core::event_bus::{EventBus, InboundMessage, OutboundMessage, Subscription};
use album_store_core::trace_context::TraceContext;
use album_store_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn message(topic: &str, key: &str, body: &str) -> OutboundMessage {
    OutboundMessage {
        topic: topic.to_string(),
        key: key.to_string(),
        payload: body.as_bytes().to_vec(),
        trace_context: TraceContext::new().with("traceparent", format!("00-{key}-01")),
    }
}

/// Start Kafka and return a bus that can publish to it.
async fn start_kafka() -> (ContainerAsync<Kafka>, RedpandaEventBus) {
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

    let bus = RedpandaEventBus::builder()
        .brokers(format!("PLAINTEXT://{host}:{port}"))
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create event bus");

    for attempt in 1..=60 {
        if bus.publish(&message("warmup", "w", "{}")).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(500)).await;
            return (kafka, bus);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
    unreachable!("readiness loop either returns or panics")
}

async fn next_message(subscription: &mut Subscription) -> InboundMessage {
    tokio::time::timeout(Duration::from_secs(30), subscription.next())
        .await
        .expect("Timeout waiting for message")
        .expect("Subscription ended")
        .expect("Failed to receive message")
}

#[tokio::test]
#[ignore]
async fn test_round_trip_preserves_key_payload_and_headers() {
    let (_kafka, bus) = start_kafka().await;

    bus.publish(&message("order-created", "order-1", r#"{"orderId":"order-1"}"#))
        .await
        .expect("Failed to publish");

    let mut subscription = bus
        .subscribe("order-created", "round-trip")
        .await
        .expect("Failed to subscribe");

    let received = next_message(&mut subscription).await;
    assert_eq!(received.key.as_deref(), Some("order-1"));
    assert_eq!(received.payload, br#"{"orderId":"order-1"}"#.to_vec());
    assert_eq!(
        received.trace_context.get("traceparent"),
        Some("00-order-1-01")
    );
}

#[tokio::test]
#[ignore]
async fn test_uncommitted_message_is_redelivered() {
    let (_kafka, bus) = start_kafka().await;

    bus.publish(&message("redelivery", "a", "first"))
        .await
        .expect("Failed to publish");
    bus.publish(&message("redelivery", "b", "second"))
        .await
        .expect("Failed to publish");

    let mut first = bus
        .subscribe("redelivery", "redelivery-group")
        .await
        .expect("Failed to subscribe");
    let a = next_message(&mut first).await;
    first.commit(&a).expect("Failed to commit");
    let b = next_message(&mut first).await;
    assert_eq!(b.key.as_deref(), Some("b"));
    // Give the async commit time to reach the broker before leaving the group.
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(first);

    let mut second = bus
        .subscribe("redelivery", "redelivery-group")
        .await
        .expect("Failed to resubscribe");
    let again = next_message(&mut second).await;
    assert_eq!(again.key.as_deref(), Some("b"));
    assert_eq!(again.offset, b.offset);
}
