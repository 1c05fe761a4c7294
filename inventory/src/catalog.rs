//! Catalog Bootstrap Listener.
//!
//! Materializes a Ledger row for every `album-created` event. Creation is
//! insert-if-absent, so duplicate, redelivered or late events leave an
//! existing row untouched.

use album_store_core::event::AlbumCreated;
use album_store_core::event_bus::InboundMessage;
use album_store_core::inventory::InventoryLedger;
use album_store_runtime::metrics::LedgerMetrics;
use album_store_runtime::{Disposition, HandlerError, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Seeds the Ledger from `album-created`.
pub struct CatalogBootstrapListener {
    ledger: Arc<dyn InventoryLedger>,
}

impl CatalogBootstrapListener {
    /// Create a listener writing to `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn InventoryLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl MessageHandler for CatalogBootstrapListener {
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, HandlerError> {
        let album: AlbumCreated = match message.decode() {
            Ok(album) => album,
            Err(e) => {
                LedgerMetrics::record_bootstrap("malformed");
                warn!(offset = message.offset, error = %e, "Skipping undecodable album-created payload");
                return Ok(Disposition::Skipped);
            }
        };

        let quantity = album.starting_quantity();
        match self.ledger.upsert_if_absent(&album.album_id, quantity).await {
            Ok(true) => {
                LedgerMetrics::record_bootstrap("created");
                info!(album_id = %album.album_id, quantity, "Inventory initialised for album");
                Ok(Disposition::Processed)
            }
            Ok(false) => {
                LedgerMetrics::record_bootstrap("existing");
                info!(album_id = %album.album_id, "Inventory already exists for album");
                Ok(Disposition::Skipped)
            }
            Err(e) if e.is_transient() => {
                warn!(album_id = %album.album_id, error = %e, "Failed to initialise inventory");
                Err(HandlerError::Transient(e.to_string()))
            }
            Err(e) => {
                LedgerMetrics::record_bootstrap("unprocessable");
                error!(album_id = %album.album_id, error = %e, "Skipping album the store cannot initialise");
                Ok(Disposition::Skipped)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use album_store_core::trace_context::TraceContext;
    use album_store_testing::{InMemoryEventBus, InMemoryInventoryStore};

    fn album_message(bus: &InMemoryEventBus, payload: &str) -> InboundMessage {
        let offset = bus.append_raw("album-created", Some("a-1"), payload, TraceContext::new());
        bus.published("album-created").remove(usize::try_from(offset).unwrap())
    }

    #[tokio::test]
    async fn creates_row_at_declared_quantity() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let listener = CatalogBootstrapListener::new(store.clone());
        let bus = InMemoryEventBus::new();

        let message = album_message(
            &bus,
            r#"{"albumId":"a-1","title":"T","artist":"A","timestamp":"2025-01-01T00:00:00Z","initialQuantity":12}"#,
        );

        assert_eq!(listener.handle(&message).await, Ok(Disposition::Processed));
        assert_eq!(store.quantity("a-1"), Some(12));
    }

    #[tokio::test]
    async fn storage_failure_requests_redelivery() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store.set_unavailable(true);
        let listener = CatalogBootstrapListener::new(store.clone());
        let bus = InMemoryEventBus::new();

        let message = album_message(
            &bus,
            r#"{"albumId":"a-1","title":"T","artist":"A","timestamp":"2025-01-01T00:00:00Z"}"#,
        );

        assert!(matches!(
            listener.handle(&message).await,
            Err(HandlerError::Transient(_))
        ));
        store.set_unavailable(false);
        assert_eq!(store.quantity("a-1"), None);
    }

    #[tokio::test]
    async fn non_transient_storage_error_is_skipped() {
        let store = Arc::new(InMemoryInventoryStore::new());
        store.reject_next(1);
        let listener = CatalogBootstrapListener::new(store.clone());
        let bus = InMemoryEventBus::new();

        let message = album_message(
            &bus,
            r#"{"albumId":"a-1","title":"T","artist":"A","timestamp":"2025-01-01T00:00:00Z","initialQuantity":3}"#,
        );

        assert_eq!(listener.handle(&message).await, Ok(Disposition::Skipped));
        assert_eq!(store.quantity("a-1"), None);
    }

    #[tokio::test]
    async fn undecodable_payload_is_skipped() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let listener = CatalogBootstrapListener::new(store.clone());
        let bus = InMemoryEventBus::new();

        let message = album_message(&bus, r#"{"title":"no id"}"#);

        assert_eq!(listener.handle(&message).await, Ok(Disposition::Skipped));
        assert_eq!(store.quantity("a-1"), None);
    }
}
