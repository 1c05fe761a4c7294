//! Ledger and Processed-Order Record contracts.
//!
//! The Ledger holds one non-negative `quantity_available` per album. The
//! Processed-Order Record holds one marker per order that reached a terminal
//! outcome. Both are shared by every replica of the inventory service, so all
//! mutation goes through the storage engine's own atomicity:
//!
//! - [`InventoryLedger::try_decrement`] is a single conditional update
//!   (`... WHERE quantity_available >= qty`); callers branch on whether a row
//!   was affected and never read-then-write
//! - [`InventoryStore::reserve_for_order`] wraps marker insertion and the
//!   conditional update in one transaction, so a redelivered order can neither
//!   deduct twice nor be resolved twice

use crate::event::FailureReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors from Ledger / Processed-Order storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached, or a unit of work could not begin or commit.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A statement failed for a reason other than availability.
    #[error("Storage query failed: {0}")]
    Query(String),

    /// A quantity that can never be stored or deducted.
    #[error("Invalid quantity: {0}")]
    InvalidQuantity(i32),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One Ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Catalog item identifier.
    pub album_id: String,
    /// Copies available for reservation, never negative.
    pub quantity_available: i32,
    /// Last mutation time.
    pub last_updated: DateTime<Utc>,
}

/// Terminal status recorded on a processed-order marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedStatus {
    /// Stock was deducted.
    Succeeded,
    /// The order was rejected for the given cause.
    Failed(FailureReason),
    /// The marker predates terminal status recording; the outcome is unknown.
    Unrecorded,
}

impl ProcessedStatus {
    /// Status column value, `None` for [`ProcessedStatus::Unrecorded`].
    #[must_use]
    pub const fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::Succeeded => Some("SUCCEEDED"),
            Self::Failed(_) => Some("FAILED"),
            Self::Unrecorded => None,
        }
    }

    /// Reason column value.
    #[must_use]
    pub const fn reason(&self) -> Option<FailureReason> {
        match self {
            Self::Succeeded | Self::Unrecorded => None,
            Self::Failed(reason) => Some(*reason),
        }
    }

    /// Rebuild from the status and reason columns.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] for values this code never writes.
    pub fn from_columns(status: Option<&str>, reason: Option<&str>) -> Result<Self, StoreError> {
        match (status, reason) {
            (None, _) => Ok(Self::Unrecorded),
            (Some("SUCCEEDED"), _) => Ok(Self::Succeeded),
            (Some("FAILED"), Some(reason)) => FailureReason::parse(reason)
                .map(Self::Failed)
                .ok_or_else(|| StoreError::Query(format!("Unknown failure reason: {reason}"))),
            (Some("FAILED"), None) => Ok(Self::Failed(FailureReason::InsufficientInventory)),
            (Some(other), _) => {
                Err(StoreError::Query(format!("Unknown processed status: {other}")))
            }
        }
    }
}

/// One processed-order marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedOrder {
    /// The resolved order.
    pub order_id: String,
    /// How it was resolved.
    pub status: ProcessedStatus,
    /// When it was resolved.
    pub processed_at: DateTime<Utc>,
}

/// Why a conditional decrement did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCause {
    /// The row exists but holds fewer copies than requested.
    InsufficientStock {
        /// Copies available when the decrement was evaluated.
        available: i32,
    },
    /// No row for the album.
    UnknownItem,
    /// The order requested zero or fewer copies.
    InvalidQuantity,
}

impl RejectionCause {
    /// Precise failure reason for this cause.
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        match self {
            Self::InsufficientStock { .. } => FailureReason::InsufficientInventory,
            Self::UnknownItem => FailureReason::ItemNotFound,
            Self::InvalidQuantity => FailureReason::InvalidQuantity,
        }
    }
}

/// Result of one reservation unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Stock deducted and marker recorded.
    Reserved,
    /// Nothing deducted; marker recorded as failed.
    Rejected(RejectionCause),
    /// A marker already existed; nothing changed.
    AlreadyProcessed,
}

/// The per-item available-quantity counter.
pub trait InventoryLedger: Send + Sync {
    /// Deduct `quantity` if and only if at least `quantity` copies are available.
    ///
    /// Returns whether the row was updated. A missing row and insufficient
    /// stock both return `false`, and neither creates or alters a row.
    fn try_decrement<'a>(&'a self, album_id: &'a str, quantity: i32) -> StoreFuture<'a, bool>;

    /// Create the row at `initial_quantity` unless it already exists.
    ///
    /// Returns whether this call created the row.
    fn upsert_if_absent<'a>(
        &'a self,
        album_id: &'a str,
        initial_quantity: i32,
    ) -> StoreFuture<'a, bool>;

    /// Read one row.
    fn get<'a>(&'a self, album_id: &'a str) -> StoreFuture<'a, Option<LedgerEntry>>;

    /// Read every row.
    fn list(&self) -> StoreFuture<'_, Vec<LedgerEntry>>;

    /// Administrative overwrite: set the quantity unconditionally, creating the
    /// row when absent.
    fn set_quantity<'a>(&'a self, album_id: &'a str, quantity: i32)
    -> StoreFuture<'a, LedgerEntry>;
}

/// Durable record of orders that reached a terminal outcome.
pub trait ProcessedOrders: Send + Sync {
    /// Whether a marker exists for `order_id`.
    fn exists<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, bool>;

    /// Insert a marker unless one exists. Returns whether this call inserted it.
    fn mark_processed<'a>(
        &'a self,
        order_id: &'a str,
        status: ProcessedStatus,
    ) -> StoreFuture<'a, bool>;

    /// Read one marker.
    fn get_processed<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<ProcessedOrder>>;
}

/// A store holding both the Ledger and the Processed-Order Record, able to
/// mutate them in a single unit of work.
pub trait InventoryStore: InventoryLedger + ProcessedOrders {
    /// Resolve `order_id` against the Ledger exactly once.
    ///
    /// Within one transaction: claim the marker (returning
    /// [`Reservation::AlreadyProcessed`] untouched if it was already there),
    /// run the conditional decrement, classify a zero-row result, record the
    /// terminal status, commit. If the transaction does not commit, neither
    /// the marker nor the deduction persists.
    fn reserve_for_order<'a>(
        &'a self,
        order_id: &'a str,
        album_id: &'a str,
        quantity: i32,
    ) -> StoreFuture<'a, Reservation>;
}
