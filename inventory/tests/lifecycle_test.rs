//! Whole-application wiring on in-memory infrastructure.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use album_store_core::environment::Clock;
use album_store_core::event::{AlbumCreated, OrderCreated, OrderFailed, topics};
use album_store_core::trace_context::TraceContext;
use album_store_runtime::metrics::PrometheusMetrics;
use album_store_testing::{InMemoryEventBus, InMemoryInventoryStore, test_clock};
use inventory_service::{Application, Config};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("SERVICE_HOST".to_string(), "127.0.0.1".to_string()),
        ("SERVICE_PORT".to_string(), "0".to_string()),
        ("CONSUMER_INITIAL_BACKOFF_MS".to_string(), "5".to_string()),
        ("CONSUMER_MAX_BACKOFF_MS".to_string(), "20".to_string()),
        ("SHUTDOWN_TIMEOUT".to_string(), "5".to_string()),
    ]);
    for (key, value) in extra {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned())
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn catalog_then_orders_flow_through_both_consumers() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let bus = InMemoryEventBus::new();
    let config = test_config(&[("FAILURE_REASON_MODE", "detailed")]);

    let app = Application::build(
        &config,
        store.clone(),
        Arc::new(bus.clone()),
        Arc::new(test_clock()),
        PrometheusMetrics::detached().unwrap(),
    )
    .await
    .expect("application builds");
    assert_ne!(app.local_addr().unwrap().port(), 0);

    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async {
        let _ = stopped.await;
    }));

    bus.append_event(
        &AlbumCreated {
            album_id: "album-1".to_string(),
            title: "Blue Train".to_string(),
            artist: "John Coltrane".to_string(),
            timestamp: test_clock().now(),
            initial_quantity: Some(1),
        },
        TraceContext::new(),
    )
    .unwrap();
    wait_for("album seeded", || store.quantity("album-1") == Some(1)).await;

    for (id, album) in [("o-1", "album-1"), ("o-2", "album-1"), ("o-3", "ghost")] {
        bus.append_event(
            &OrderCreated {
                order_id: id.to_string(),
                album_id: album.to_string(),
                quantity: 1,
                user_id: "user-1".to_string(),
                timestamp: test_clock().now(),
            },
            TraceContext::new(),
        )
        .unwrap();
    }
    wait_for("three outcomes", || {
        bus.published(topics::ORDER_SUCCEEDED).len() + bus.published(topics::ORDER_FAILED).len()
            == 3
    })
    .await;

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .expect("application shuts down")
        .expect("application task does not panic")
        .expect("application exits cleanly");

    let failed: Vec<OrderFailed> = bus.published_events(topics::ORDER_FAILED);
    let reasons: Vec<(&str, &str)> = failed
        .iter()
        .map(|e| (e.order_id.as_str(), e.reason.as_str()))
        .collect();
    assert_eq!(
        reasons,
        vec![("o-2", "INSUFFICIENT_INVENTORY"), ("o-3", "ITEM_NOT_FOUND")]
    );
    assert_eq!(store.quantity("album-1"), Some(0));
    assert_eq!(
        bus.committed_offset(topics::ALBUM_CREATED, "inventory-service-album-init"),
        Some(1)
    );
}

#[tokio::test]
async fn binding_an_unavailable_address_fails() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port().to_string();
    let config = test_config(&[("SERVICE_PORT", port.as_str())]);

    let result = Application::build(
        &config,
        Arc::new(InMemoryInventoryStore::new()),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(test_clock()),
        PrometheusMetrics::detached().unwrap(),
    )
    .await;

    assert!(matches!(
        result,
        Err(inventory_service::LifecycleError::Bind { .. })
    ));
}
