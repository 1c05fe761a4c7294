//! Synchronous inventory operations used by the HTTP surface.
//!
//! [`InventoryService::reserve_inventory`] is the direct counterpart of the
//! event-driven reservation: the same conditional decrement, invoked without
//! an order or an idempotency marker.

use album_store_core::inventory::{InventoryLedger, LedgerEntry, StoreError};
use std::sync::Arc;
use thiserror::Error;

/// Errors from [`InventoryService::reserve_inventory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReserveError {
    /// The requested quantity was zero or negative.
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i32),

    /// No Ledger entry exists for the album.
    #[error("No inventory found for album {0}")]
    NotFound(String),

    /// The entry holds fewer copies than requested.
    #[error("Insufficient inventory for album {album_id}: requested {requested}, available {available}")]
    Insufficient {
        /// Album asked for.
        album_id: String,
        /// Copies requested.
        requested: i32,
        /// Copies available after the decrement was refused.
        available: i32,
    },

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Ledger operations behind the HTTP routes.
#[derive(Clone)]
pub struct InventoryService {
    ledger: Arc<dyn InventoryLedger>,
}

impl InventoryService {
    /// Create a service over `ledger`.
    #[must_use]
    pub fn new(ledger: Arc<dyn InventoryLedger>) -> Self {
        Self { ledger }
    }

    /// Deduct `quantity` copies of `album_id` if enough are available.
    ///
    /// # Errors
    ///
    /// - [`ReserveError::InvalidQuantity`] for `quantity <= 0`
    /// - [`ReserveError::NotFound`] when the album has no Ledger entry
    /// - [`ReserveError::Insufficient`] when the decrement did not apply
    /// - [`ReserveError::Store`] when the store failed
    pub async fn reserve_inventory(&self, album_id: &str, quantity: i32) -> Result<(), ReserveError> {
        if quantity <= 0 {
            return Err(ReserveError::InvalidQuantity(quantity));
        }

        if self.ledger.try_decrement(album_id, quantity).await? {
            tracing::info!(album_id, quantity, "Inventory reserved directly");
            return Ok(());
        }

        // Classification only; the decrement above already decided.
        match self.ledger.get(album_id).await? {
            None => Err(ReserveError::NotFound(album_id.to_string())),
            Some(entry) => Err(ReserveError::Insufficient {
                album_id: album_id.to_string(),
                requested: quantity,
                available: entry.quantity_available,
            }),
        }
    }

    /// The Ledger entry of `album_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn entry(&self, album_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        self.ledger.get(album_id).await
    }

    /// Every Ledger entry, ordered by album id.
    ///
    /// # Errors
    ///
    /// Returns the store error if the read fails.
    pub async fn list(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.ledger.list().await
    }

    /// Administrative overwrite of one entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidQuantity`] for a negative quantity, or the
    /// store error if the write fails.
    pub async fn set_quantity(&self, album_id: &str, quantity: i32) -> Result<LedgerEntry, StoreError> {
        self.ledger.set_quantity(album_id, quantity).await
    }
}
