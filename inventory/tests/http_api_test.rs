//! HTTP API tests against the router, backed by the in-memory store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use album_store_runtime::metrics::PrometheusMetrics;
use album_store_testing::{InMemoryInventoryStore, test_clock};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use inventory_service::InventoryService;
use inventory_service::api::inventory::{InventoryResponse, ReserveResponse};
use inventory_service::server::{AppState, build_router};
use serde_json::{Value, json};
use std::sync::Arc;

fn client_type() -> HeaderName {
    HeaderName::from_static("client-type")
}

fn admin() -> HeaderValue {
    HeaderValue::from_static("admin")
}

fn server_with(store: &Arc<InMemoryInventoryStore>) -> TestServer {
    let state = AppState::new(
        InventoryService::new(store.clone()),
        Arc::new(test_clock()),
        PrometheusMetrics::detached().expect("recorder builds"),
    );
    TestServer::new(build_router(state)).expect("test server starts")
}

#[tokio::test]
async fn health_reports_ok() {
    let server = server_with(&Arc::new(InMemoryInventoryStore::new()));

    let response = server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn metrics_endpoint_renders_text() {
    let server = server_with(&Arc::new(InMemoryInventoryStore::new()));

    let response = server.get("/metrics").await;

    response.assert_status_ok();
    assert!(!response.text().contains("VALIDATION_ERROR"));
}

#[tokio::test]
async fn get_inventory_returns_entry() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("album-1", 12);
    let server = server_with(&store);

    let response = server.get("/api/inventory/album-1").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["albumId"], "album-1");
    assert_eq!(body["quantityAvailable"], 12);
    assert!(body.get("lastUpdated").is_some());
}

#[tokio::test]
async fn unknown_album_reads_as_zero() {
    let server = server_with(&Arc::new(InMemoryInventoryStore::new()));

    let response = server.get("/api/inventory/nope").await;

    response.assert_status_ok();
    let body: InventoryResponse = response.json();
    assert_eq!(body.album_id, "nope");
    assert_eq!(body.quantity_available, 0);
}

#[tokio::test]
async fn admin_routes_require_admin_header() {
    let server = server_with(&Arc::new(InMemoryInventoryStore::new()));

    server
        .get("/api/inventory")
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .put("/api/inventory/album-1")
        .add_header(client_type(), HeaderValue::from_static("user"))
        .json(&json!({ "quantityAvailable": 5 }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
    server
        .post("/api/inventory/album-1/reservations")
        .json(&json!({ "quantity": 1 }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_lists_every_entry() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("b", 2);
    store.seed("a", 1);
    let server = server_with(&store);

    let response = server
        .get("/api/inventory")
        .add_header(client_type(), admin())
        .await;

    response.assert_status_ok();
    let entries: Vec<InventoryResponse> = response.json();
    let ids: Vec<&str> = entries.iter().map(|e| e.album_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn admin_overwrites_quantity() {
    let store = Arc::new(InMemoryInventoryStore::new());
    let server = server_with(&store);

    let response = server
        .put("/api/inventory/album-1")
        .add_header(client_type(), admin())
        .json(&json!({ "quantityAvailable": 40 }))
        .await;

    response.assert_status_ok();
    let body: InventoryResponse = response.json();
    assert_eq!(body.quantity_available, 40);
    assert_eq!(store.quantity("album-1"), Some(40));
}

#[tokio::test]
async fn negative_overwrite_is_rejected() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("album-1", 3);
    let server = server_with(&store);

    let response = server
        .put("/api/inventory/album-1")
        .add_header(client_type(), admin())
        .json(&json!({ "quantityAvailable": -1 }))
        .await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(store.quantity("album-1"), Some(3));
}

#[tokio::test]
async fn direct_reservation_deducts_stock() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("album-1", 3);
    let server = server_with(&store);

    let response = server
        .post("/api/inventory/album-1/reservations")
        .add_header(client_type(), admin())
        .json(&json!({ "quantity": 2 }))
        .await;

    response.assert_status_ok();
    let body: ReserveResponse = response.json();
    assert_eq!(body.reserved, 2);
    assert_eq!(store.quantity("album-1"), Some(1));
}

#[tokio::test]
async fn direct_reservation_reports_refusals() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.seed("album-1", 1);
    let server = server_with(&store);

    server
        .post("/api/inventory/album-1/reservations")
        .add_header(client_type(), admin())
        .json(&json!({ "quantity": 2 }))
        .await
        .assert_status(StatusCode::CONFLICT);
    server
        .post("/api/inventory/missing/reservations")
        .add_header(client_type(), admin())
        .json(&json!({ "quantity": 1 }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .post("/api/inventory/album-1/reservations")
        .add_header(client_type(), admin())
        .json(&json!({ "quantity": 0 }))
        .await
        .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    assert_eq!(store.quantity("album-1"), Some(1));
    assert_eq!(store.quantity("missing"), None);
}

#[tokio::test]
async fn store_outage_is_service_unavailable() {
    let store = Arc::new(InMemoryInventoryStore::new());
    store.set_unavailable(true);
    let server = server_with(&store);

    let response = server.get("/api/inventory/album-1").await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
}
