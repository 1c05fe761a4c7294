//! # Album Store Core
//!
//! Shared abstractions for the album store services.
//!
//! The inventory service coordinates with the catalog and ordering services
//! exclusively through events on a Kafka-compatible broker. This crate holds
//! everything those pieces agree on:
//!
//! - [`event`]: the JSON wire codec for `album-created`, `order-created`,
//!   `order-succeeded` and `order-failed`
//! - [`trace_context`]: the opaque header bag carried alongside every message
//! - [`event_bus`]: the publish/subscribe seam with explicit offset commits
//! - [`inventory`]: the Ledger and Processed-Order Record contracts
//! - [`environment`]: injected time
//!
//! ## Flow
//!
//! ```text
//! order-created ──► ReservationCoordinator ──► reserve_for_order (one transaction)
//!                                                   │
//!                              ┌────────────────────┴────────────────────┐
//!                              ▼                                         ▼
//!                       order-succeeded                            order-failed
//! ```
//!
//! Storage is the only place where concurrency is resolved: implementations of
//! [`inventory::InventoryLedger::try_decrement`] must be a single conditional
//! update evaluated by the store itself.

pub use chrono::{DateTime, Utc};

pub mod event;
pub mod event_bus;
pub mod inventory;
pub mod trace_context;

/// Environment module - injected dependencies that are not storage or transport.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use album_store_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
