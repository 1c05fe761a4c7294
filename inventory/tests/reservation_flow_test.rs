//! End-to-end reservation flow on the in-memory bus and store.
//!
//! The coordinator runs inside a real `EventConsumer`, so these tests cover
//! ordering, commit-after-handle and redelivery as well as the reservation
//! rules themselves.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use album_store_core::environment::Clock;
use album_store_core::event::{
    FailureReasonMode, OrderCreated, OrderFailed, OrderSucceeded, topics,
};
use album_store_core::trace_context::TraceContext;
use album_store_runtime::{EventConsumer, RetryPolicy};
use album_store_testing::properties::{order_stream, starting_stock};
use album_store_testing::{InMemoryEventBus, InMemoryInventoryStore, test_clock};
use inventory_service::{OutcomePublisher, ReservationCoordinator, Resolution};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const GROUP: &str = "inventory-service-consumers";

fn order(order_id: &str, album_id: &str, quantity: i32) -> OrderCreated {
    OrderCreated {
        order_id: order_id.to_string(),
        album_id: album_id.to_string(),
        quantity,
        user_id: "user-1".to_string(),
        timestamp: test_clock().now(),
    }
}

fn coordinator(store: &Arc<InMemoryInventoryStore>, bus: &InMemoryEventBus) -> ReservationCoordinator {
    ReservationCoordinator::new(
        store.clone(),
        OutcomePublisher::new(Arc::new(bus.clone())),
        Arc::new(test_clock()),
    )
}

/// A running reservation consumer and the handle to stop it.
struct Harness {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(store: &Arc<InMemoryInventoryStore>, bus: &InMemoryEventBus) -> Self {
        let (shutdown, rx) = broadcast::channel(1);
        let consumer = EventConsumer::builder()
            .name("reservation")
            .topic(topics::ORDER_CREATED)
            .consumer_group(GROUP)
            .event_bus(Arc::new(bus.clone()))
            .handler(Arc::new(coordinator(store, bus)))
            .shutdown(rx)
            .backoff(
                RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(5))
                    .max_delay(Duration::from_millis(20))
                    .build(),
            )
            .build()
            .expect("consumer builds");
        Self {
            shutdown,
            task: consumer.spawn(),
        }
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("consumer stops")
            .expect("consumer task does not panic");
    }
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn outcome_count(bus: &InMemoryEventBus) -> usize {
    bus.published(topics::ORDER_SUCCEEDED).len() + bus.published(topics::ORDER_FAILED).len()
}

#[tokio::test]
async fn three_orders_drain_stock_of_three() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 3);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    for i in 0..3 {
        bus.append_event(&order(&format!("order-{i}"), "A", 1), TraceContext::new())
            .unwrap();
    }

    eventually("three outcomes", || outcome_count(&bus) == 3).await;
    harness.stop().await;

    assert_eq!(bus.published(topics::ORDER_SUCCEEDED).len(), 3);
    assert!(bus.published(topics::ORDER_FAILED).is_empty());
    assert_eq!(store.quantity("A"), Some(0));
    assert_eq!(bus.committed_offset(topics::ORDER_CREATED, GROUP), Some(3));
}

#[tokio::test]
async fn fourth_order_against_three_fails_and_stock_is_conserved() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 3);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    for i in 0..4 {
        bus.append_event(&order(&format!("order-{i}"), "A", 1), TraceContext::new())
            .unwrap();
    }

    eventually("four outcomes", || outcome_count(&bus) == 4).await;
    harness.stop().await;

    let succeeded = bus.published(topics::ORDER_SUCCEEDED).len();
    let failed: Vec<OrderFailed> = bus.published_events(topics::ORDER_FAILED);
    assert_eq!(succeeded, 3);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, "INSUFFICIENT_INVENTORY");
    assert_eq!(store.quantity("A"), Some(3 - i32::try_from(succeeded).unwrap()));
}

#[tokio::test]
async fn order_for_unknown_item_fails_without_creating_a_row() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    bus.append_event(&order("order-b", "B", 1), TraceContext::new())
        .unwrap();

    eventually("failure outcome", || outcome_count(&bus) == 1).await;
    harness.stop().await;

    let failed: Vec<OrderFailed> = bus.published_events(topics::ORDER_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].order_id, "order-b");
    assert_eq!(failed[0].reason, "INSUFFICIENT_INVENTORY");
    assert_eq!(store.quantity("B"), None);
}

#[tokio::test]
async fn redelivered_order_yields_exactly_one_outcome() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 10);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    for _ in 0..3 {
        bus.append_event(&order("order-1", "A", 2), TraceContext::new())
            .unwrap();
    }
    bus.append_event(&order("order-2", "A", 1), TraceContext::new())
        .unwrap();

    eventually("all four messages committed", || {
        bus.committed_offset(topics::ORDER_CREATED, GROUP) == Some(4)
    })
    .await;
    harness.stop().await;

    let succeeded: Vec<OrderSucceeded> = bus.published_events(topics::ORDER_SUCCEEDED);
    let ids: Vec<&str> = succeeded.iter().map(|e| e.order_id.as_str()).collect();
    assert_eq!(ids, vec!["order-1", "order-2"]);
    assert_eq!(store.quantity("A"), Some(7));
    assert_eq!(store.processed_count(), 2);
}

#[tokio::test]
async fn poison_message_does_not_block_the_topic() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 1);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    bus.append_raw(topics::ORDER_CREATED, Some("junk"), "{not json", TraceContext::new());
    bus.append_raw(
        topics::ORDER_CREATED,
        Some("partial"),
        r#"{"orderId":"x","quantity":1}"#,
        TraceContext::new(),
    );
    bus.append_event(&order("order-1", "A", 1), TraceContext::new())
        .unwrap();

    eventually("valid order resolved", || outcome_count(&bus) == 1).await;
    eventually("everything committed", || {
        bus.committed_offset(topics::ORDER_CREATED, GROUP) == Some(3)
    })
    .await;
    harness.stop().await;

    assert_eq!(bus.published(topics::ORDER_SUCCEEDED).len(), 1);
    assert_eq!(store.quantity("A"), Some(0));
}

#[tokio::test]
async fn order_the_store_rejects_is_skipped_and_later_orders_resolve() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 1);
    // The first statement fails the way an over-long key fails in Postgres.
    store.reject_next(1);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    bus.append_event(&order("order-1", &"x".repeat(60), 1), TraceContext::new())
        .unwrap();
    bus.append_event(&order("order-2", "A", 1), TraceContext::new())
        .unwrap();

    eventually("valid order resolved", || outcome_count(&bus) == 1).await;
    eventually("both committed", || {
        bus.committed_offset(topics::ORDER_CREATED, GROUP) == Some(2)
    })
    .await;
    harness.stop().await;

    let succeeded: Vec<OrderSucceeded> = bus.published_events(topics::ORDER_SUCCEEDED);
    assert_eq!(succeeded.len(), 1);
    assert_eq!(succeeded[0].order_id, "order-2");
    assert_eq!(store.quantity("A"), Some(0));
    assert_eq!(store.processed_count(), 1);
    assert_eq!(bus.subscription_count(topics::ORDER_CREATED, GROUP), 1);
}

#[tokio::test]
async fn transient_store_failure_is_redelivered_and_resolved_once() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 5);
    store.fail_next(2);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    bus.append_event(&order("order-1", "A", 2), TraceContext::new())
        .unwrap();

    eventually("order resolved after redelivery", || outcome_count(&bus) == 1).await;
    eventually("message committed", || {
        bus.committed_offset(topics::ORDER_CREATED, GROUP) == Some(1)
    })
    .await;
    harness.stop().await;

    assert!(bus.subscription_count(topics::ORDER_CREATED, GROUP) >= 3);
    assert_eq!(bus.published(topics::ORDER_SUCCEEDED).len(), 1);
    assert_eq!(store.quantity("A"), Some(3));
}

#[tokio::test]
async fn store_outage_leaves_message_uncommitted() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 5);
    store.set_unavailable(true);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    bus.append_event(&order("order-1", "A", 1), TraceContext::new())
        .unwrap();

    eventually("a resubscription", || {
        bus.subscription_count(topics::ORDER_CREATED, GROUP) >= 2
    })
    .await;
    assert_eq!(bus.committed_offset(topics::ORDER_CREATED, GROUP), None);
    assert_eq!(outcome_count(&bus), 0);

    store.set_unavailable(false);
    eventually("order resolved once the store is back", || outcome_count(&bus) == 1).await;
    harness.stop().await;

    assert_eq!(store.quantity("A"), Some(4));
}

#[tokio::test]
async fn trace_context_is_copied_onto_the_outcome() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 1);
    let bus = InMemoryEventBus::new();
    let harness = Harness::start(&store, &bus);

    let context = TraceContext::new()
        .with("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        .with("tracestate", "vendor=opaque");
    bus.append_event(&order("order-1", "A", 1), context.clone())
        .unwrap();
    bus.append_event(&order("order-2", "A", 1), TraceContext::new())
        .unwrap();

    eventually("two outcomes", || outcome_count(&bus) == 2).await;
    harness.stop().await;

    let succeeded = bus.published(topics::ORDER_SUCCEEDED);
    assert_eq!(succeeded[0].trace_context, context);
    let failed = bus.published(topics::ORDER_FAILED);
    assert!(failed[0].trace_context.is_empty());
}

#[tokio::test]
async fn non_positive_quantity_fails_without_touching_the_ledger() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 5);
    let bus = InMemoryEventBus::new();
    let coordinator =
        coordinator(&store, &bus).with_failure_reason_mode(FailureReasonMode::Detailed);

    let resolution = coordinator
        .resolve(&order("order-1", "A", 0), &TraceContext::new())
        .await
        .unwrap();

    assert!(matches!(resolution, Resolution::Resolved(_)));
    let failed: Vec<OrderFailed> = bus.published_events(topics::ORDER_FAILED);
    assert_eq!(failed[0].reason, "INVALID_QUANTITY");
    assert_eq!(store.quantity("A"), Some(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("A", 7);
    let bus = InMemoryEventBus::new();
    let coordinator = Arc::new(coordinator(&store, &bus));

    let attempts = (0..20).map(|i| {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move {
            coordinator
                .resolve(&order(&format!("order-{i}"), "A", 2), &TraceContext::new())
                .await
                .unwrap()
        })
    });
    let results = futures::future::join_all(attempts).await;
    assert!(results.iter().all(Result::is_ok));

    let succeeded = bus.published(topics::ORDER_SUCCEEDED).len();
    let failed = bus.published(topics::ORDER_FAILED).len();
    assert_eq!(succeeded, 3);
    assert_eq!(failed, 17);
    assert_eq!(store.quantity("A"), Some(1));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ledger_never_goes_negative(
        stock in starting_stock(3),
        orders in order_stream(3, 40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let store = Arc::new(InMemoryInventoryStore::new());
            for (idx, quantity) in stock.iter().enumerate() {
                store.seed(&format!("album-{idx}"), *quantity);
            }
            let bus = InMemoryEventBus::new();
            let coordinator = coordinator(&store, &bus);

            let mut reserved = vec![0i32; stock.len()];
            for (n, (album, quantity)) in orders.iter().enumerate() {
                let album_id = format!("album-{album}");
                let resolution = coordinator
                    .resolve(&order(&format!("order-{n}"), &album_id, *quantity), &TraceContext::new())
                    .await
                    .unwrap();
                if let Resolution::Resolved(outcome) = resolution {
                    if outcome.topic() == topics::ORDER_SUCCEEDED {
                        reserved[*album] += *quantity;
                    }
                }
                let remaining = store.quantity(&album_id).unwrap();
                prop_assert!(remaining >= 0);
            }

            for (idx, quantity) in stock.iter().enumerate() {
                prop_assert_eq!(
                    store.quantity(&format!("album-{idx}")),
                    Some(quantity - reserved[idx])
                );
            }
            prop_assert_eq!(outcome_count(&bus), orders.len());
            Ok(())
        })?;
    }
}
