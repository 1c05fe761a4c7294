//! Router configuration for the inventory service.

use super::health::{health_check, metrics};
use super::state::AppState;
use crate::api::inventory;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `GET /health`, `GET /metrics`
/// - `GET /api/inventory/:album_id` (public)
/// - `GET /api/inventory`, `PUT /api/inventory/:album_id`,
///   `POST /api/inventory/:album_id/reservations` (require `Client-Type: admin`)
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/inventory", get(inventory::list_inventory))
        .route(
            "/inventory/:album_id",
            get(inventory::get_inventory).put(inventory::update_inventory),
        )
        .route(
            "/inventory/:album_id/reservations",
            post(inventory::reserve_inventory),
        );

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
