//! Application state for the inventory HTTP server.

use crate::service::InventoryService;
use album_store_core::environment::Clock;
use album_store_runtime::metrics::PrometheusMetrics;
use std::sync::Arc;

/// State shared across all HTTP handlers. Cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Ledger operations
    pub inventory: InventoryService,
    /// Time source for synthesized responses
    pub clock: Arc<dyn Clock>,
    /// Prometheus handle rendered by `/metrics`
    pub metrics: PrometheusMetrics,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(inventory: InventoryService, clock: Arc<dyn Clock>, metrics: PrometheusMetrics) -> Self {
        Self {
            inventory,
            clock,
            metrics,
        }
    }
}
