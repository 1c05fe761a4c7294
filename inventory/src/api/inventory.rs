//! Inventory endpoints:
//! - GET /api/inventory/:album_id - Available quantity (public)
//! - GET /api/inventory - Every entry (admin)
//! - PUT /api/inventory/:album_id - Overwrite quantity (admin)
//! - POST /api/inventory/:album_id/reservations - Reserve directly (admin)

use super::error::AppError;
use crate::server::state::AppState;
use album_store_core::environment::Clock;
use album_store_core::inventory::LedgerEntry;
use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header identifying the calling client (`Client-Type`).
pub const CLIENT_TYPE_HEADER: &str = "client-type";

// ============================================================================
// Request/Response Types
// ============================================================================

/// One Ledger entry as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryResponse {
    /// Album identifier
    pub album_id: String,
    /// Copies available
    pub quantity_available: i32,
    /// Last change
    pub last_updated: DateTime<Utc>,
}

impl From<LedgerEntry> for InventoryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            album_id: entry.album_id,
            quantity_available: entry.quantity_available,
            last_updated: entry.last_updated,
        }
    }
}

/// Body of `PUT /api/inventory/:album_id`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInventoryRequest {
    /// New quantity, must not be negative
    pub quantity_available: i32,
}

/// Body of `POST /api/inventory/:album_id/reservations`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReserveRequest {
    /// Copies to deduct, must be positive
    pub quantity: i32,
}

/// Response of a successful direct reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveResponse {
    /// Album reserved
    pub album_id: String,
    /// Copies deducted
    pub reserved: i32,
}

fn require_admin(headers: &HeaderMap) -> Result<(), AppError> {
    let client_type = headers
        .get(CLIENT_TYPE_HEADER)
        .and_then(|value| value.to_str().ok());
    if client_type == Some("admin") {
        Ok(())
    } else {
        Err(AppError::forbidden("Admin privileges required"))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Available quantity of one album.
///
/// An album without a Ledger entry is reported with quantity 0.
///
/// # Errors
///
/// Returns 503/500 when the store fails.
pub async fn get_inventory(
    State(state): State<AppState>,
    Path(album_id): Path<String>,
) -> Result<Json<InventoryResponse>, AppError> {
    let entry = state.inventory.entry(&album_id).await?;
    let response = entry.map_or_else(
        || InventoryResponse {
            album_id: album_id.clone(),
            quantity_available: 0,
            last_updated: state.clock.now(),
        },
        InventoryResponse::from,
    );
    Ok(Json(response))
}

/// Every Ledger entry (admin only).
///
/// # Errors
///
/// Returns 403 without the admin header, 503/500 when the store fails.
pub async fn list_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<InventoryResponse>>, AppError> {
    require_admin(&headers)?;
    let entries = state.inventory.list().await?;
    Ok(Json(entries.into_iter().map(InventoryResponse::from).collect()))
}

/// Overwrite the quantity of one album, creating its entry when absent (admin only).
///
/// # Errors
///
/// Returns 403 without the admin header, 422 for a negative quantity.
pub async fn update_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    Json(request): Json<UpdateInventoryRequest>,
) -> Result<Json<InventoryResponse>, AppError> {
    require_admin(&headers)?;
    if request.quantity_available < 0 {
        return Err(AppError::validation(format!(
            "quantityAvailable must not be negative, got {}",
            request.quantity_available
        )));
    }

    let entry = state
        .inventory
        .set_quantity(&album_id, request.quantity_available)
        .await?;
    Ok(Json(entry.into()))
}

/// Reserve copies without an order (admin only).
///
/// # Errors
///
/// Returns 403 without the admin header, 422 for a non-positive quantity,
/// 404 for an unknown album and 409 when stock is insufficient.
pub async fn reserve_inventory(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(album_id): Path<String>,
    Json(request): Json<ReserveRequest>,
) -> Result<Json<ReserveResponse>, AppError> {
    require_admin(&headers)?;
    state
        .inventory
        .reserve_inventory(&album_id, request.quantity)
        .await?;

    Ok(Json(ReserveResponse {
        album_id,
        reserved: request.quantity,
    }))
}
