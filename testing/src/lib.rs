//! # Album Store Testing
//!
//! Test doubles for the album store services.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: per-topic logs with per-group committed offsets and
//!   redelivery of anything uncommitted
//! - [`InMemoryInventoryStore`]: a Ledger and Processed-Order Record behind one
//!   lock, with fault injection
//! - [`FixedClock`]: deterministic time
//! - [`properties`]: proptest strategies for order streams
//!
//! ## Example
//!
//! ```ignore
//! use album_store_testing::{InMemoryEventBus, InMemoryInventoryStore, test_clock};
//!
//! #[tokio::test]
//! async fn reserves_stock() {
//!     let store = Arc::new(InMemoryInventoryStore::new());
//!     store.seed("album-1", 5);
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     // hand both to the coordinator under test ...
//! }
//! ```

use chrono::{DateTime, Utc};
use album_store_core::environment::Clock;

pub mod event_bus;
pub mod inventory_store;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use album_store_testing::mocks::FixedClock;
    /// use album_store_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2);
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One order as seen by the reservation flow: `(album index, quantity)`.
    pub type OrderSpec = (usize, i32);

    /// Quantities as producers might send them, including zero and negatives.
    pub fn order_quantity() -> impl Strategy<Value = i32> {
        prop_oneof![
            8 => 1..=5i32,
            1 => Just(0),
            1 => -3..0i32,
        ]
    }

    /// A stream of orders spread over `albums` albums.
    pub fn order_stream(albums: usize, max_len: usize) -> impl Strategy<Value = Vec<OrderSpec>> {
        prop::collection::vec((0..albums.max(1), order_quantity()), 0..=max_len)
    }

    /// Starting stock for `albums` albums.
    pub fn starting_stock(albums: usize) -> impl Strategy<Value = Vec<i32>> {
        prop::collection::vec(0..=10i32, albums.max(1))
    }
}

pub use event_bus::InMemoryEventBus;
pub use inventory_store::InMemoryInventoryStore;
pub use mocks::{FixedClock, test_clock};
