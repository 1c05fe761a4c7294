//! Wire codec for the events exchanged between the album store services.
//!
//! Every event travels as a JSON object with camelCase field names. The read
//! policy is the same for all of them:
//!
//! - unknown fields are ignored, so producers can add fields without breaking us
//! - optional fields (only `initialQuantity` today) default to `None`
//! - descriptive fields the inventory never acts on (`title`, `artist`,
//!   `userId`) default to an empty string
//! - identifiers, quantities and timestamps are required; their absence makes
//!   the payload undecodable
//!
//! # Example
//!
//! ```
//! use album_store_core::event::{Event, OrderCreated};
//!
//! let payload = br#"{
//!     "orderId": "42",
//!     "albumId": "album-1",
//!     "quantity": 2,
//!     "userId": "user-7",
//!     "timestamp": "2025-01-01T00:00:00Z",
//!     "somethingNew": true
//! }"#;
//!
//! let event = OrderCreated::from_bytes(payload).unwrap();
//! assert_eq!(event.order_id, "42");
//! assert_eq!(event.key(), "42");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Topic names shared by every service.
pub mod topics {
    /// Catalog publishes here when an album is created.
    pub const ALBUM_CREATED: &str = "album-created";
    /// Ordering publishes here when an order is persisted.
    pub const ORDER_CREATED: &str = "order-created";
    /// Inventory publishes here when stock was reserved for an order.
    pub const ORDER_SUCCEEDED: &str = "order-succeeded";
    /// Inventory publishes here when an order could not be reserved.
    pub const ORDER_FAILED: &str = "order-failed";
}

/// Error types for event encoding and decoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// An event with a fixed home topic and a partition key.
///
/// The default codec methods encode JSON.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The topic this event is published to.
    const TOPIC: &'static str;

    /// Partition key for the message carrying this event.
    fn key(&self) -> &str;

    /// Encode this event as a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serde rejects the value.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an event from a JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the payload is not JSON,
    /// misses a required field or carries a field of the wrong type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Published by the catalog when a new album exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumCreated {
    /// Catalog identifier, used as the Ledger key.
    pub album_id: String,
    /// Album title (informational).
    #[serde(default)]
    pub title: String,
    /// Album artist (informational).
    #[serde(default)]
    pub artist: String,
    /// When the album was created.
    pub timestamp: DateTime<Utc>,
    /// Declared starting stock, if the catalog supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_quantity: Option<i32>,
}

impl AlbumCreated {
    /// Quantity to seed the Ledger with.
    ///
    /// A missing or negative declaration seeds zero.
    #[must_use]
    pub fn starting_quantity(&self) -> i32 {
        match self.initial_quantity {
            Some(quantity) if quantity >= 0 => quantity,
            _ => 0,
        }
    }
}

impl Event for AlbumCreated {
    const TOPIC: &'static str = topics::ALBUM_CREATED;

    fn key(&self) -> &str {
        &self.album_id
    }
}

/// Published by the ordering service once an order row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    /// Order identifier, the idempotency key for reservation.
    pub order_id: String,
    /// Album being ordered.
    pub album_id: String,
    /// Requested number of copies.
    pub quantity: i32,
    /// Requesting user (informational).
    #[serde(default)]
    pub user_id: String,
    /// When the order was created.
    pub timestamp: DateTime<Utc>,
}

impl Event for OrderCreated {
    const TOPIC: &'static str = topics::ORDER_CREATED;

    fn key(&self) -> &str {
        &self.order_id
    }
}

/// Stock was deducted for the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSucceeded {
    /// The resolved order.
    pub order_id: String,
    /// Resolution time.
    pub timestamp: DateTime<Utc>,
}

impl Event for OrderSucceeded {
    const TOPIC: &'static str = topics::ORDER_SUCCEEDED;

    fn key(&self) -> &str {
        &self.order_id
    }
}

/// The order could not be reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFailed {
    /// The resolved order.
    pub order_id: String,
    /// Reason code, see [`FailureReason::as_str`].
    pub reason: String,
    /// Resolution time.
    pub timestamp: DateTime<Utc>,
}

impl Event for OrderFailed {
    const TOPIC: &'static str = topics::ORDER_FAILED;

    fn key(&self) -> &str {
        &self.order_id
    }
}

/// The single terminal event emitted per order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    /// Stock reserved.
    Succeeded(OrderSucceeded),
    /// Stock not reserved.
    Failed(OrderFailed),
}

impl OrderOutcome {
    /// Build a success outcome.
    #[must_use]
    pub fn succeeded(order_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::Succeeded(OrderSucceeded {
            order_id: order_id.into(),
            timestamp,
        })
    }

    /// Build a failure outcome.
    #[must_use]
    pub fn failed(
        order_id: impl Into<String>,
        reason: FailureReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::Failed(OrderFailed {
            order_id: order_id.into(),
            reason: reason.as_str().to_string(),
            timestamp,
        })
    }

    /// Topic the outcome is routed to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => OrderSucceeded::TOPIC,
            Self::Failed(_) => OrderFailed::TOPIC,
        }
    }

    /// The order this outcome resolves.
    #[must_use]
    pub fn order_id(&self) -> &str {
        match self {
            Self::Succeeded(event) => &event.order_id,
            Self::Failed(event) => &event.order_id,
        }
    }

    /// Encode the outcome payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if serde rejects the value.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        match self {
            Self::Succeeded(event) => event.to_bytes(),
            Self::Failed(event) => event.to_bytes(),
        }
    }
}

/// Why an order was not reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// Not enough stock, or (in compatible mode) any rejection.
    InsufficientInventory,
    /// No Ledger entry exists for the album.
    ItemNotFound,
    /// The order asked for zero or fewer copies.
    InvalidQuantity,
}

impl FailureReason {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientInventory => "INSUFFICIENT_INVENTORY",
            Self::ItemNotFound => "ITEM_NOT_FOUND",
            Self::InvalidQuantity => "INVALID_QUANTITY",
        }
    }

    /// Parse the wire representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INSUFFICIENT_INVENTORY" => Some(Self::InsufficientInventory),
            "ITEM_NOT_FOUND" => Some(Self::ItemNotFound),
            "INVALID_QUANTITY" => Some(Self::InvalidQuantity),
            _ => None,
        }
    }
}

/// How rejection causes are reported to consumers of `order-failed`.
///
/// Existing consumers match on the literal `INSUFFICIENT_INVENTORY`, so
/// `Compatible` collapses every cause into that code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReasonMode {
    /// Always report `INSUFFICIENT_INVENTORY`.
    #[default]
    Compatible,
    /// Report the precise cause.
    Detailed,
}

impl FailureReasonMode {
    /// Map a precise cause to the reason this mode reports.
    #[must_use]
    pub const fn report(self, cause: FailureReason) -> FailureReason {
        match self {
            Self::Compatible => FailureReason::InsufficientInventory,
            Self::Detailed => cause,
        }
    }

    /// Parse from configuration text (`compatible` / `detailed`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compatible" => Some(Self::Compatible),
            "detailed" => Some(Self::Detailed),
            _ => None,
        }
    }
}
