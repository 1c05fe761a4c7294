//! `PostgreSQL` inventory store for the album store services.
//!
//! Implements the Ledger and the Processed-Order Record from
//! `album-store-core` on two tables:
//!
//! - `inventory(album_id, quantity_available, last_updated)` with a
//!   `CHECK (quantity_available >= 0)` as a last line of defence
//! - `processed_orders(order_id, status, reason, processed_at)`
//!
//! Every concurrency decision is made by Postgres itself: the decrement is a
//! single conditional `UPDATE`, and a reservation claims its order marker and
//! decrements inside one transaction. Queries are checked at runtime so the
//! crate builds without a live database.
//!
//! # Example
//!
//! ```ignore
//! use album_store_postgres::{PoolSettings, PostgresInventoryStore};
//!
//! async fn example() -> Result<(), album_store_core::inventory::StoreError> {
//!     let store = PostgresInventoryStore::connect(
//!         "postgres://localhost/inventory",
//!         &PoolSettings::default(),
//!     )
//!     .await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod store;

pub use error::map_sqlx_error;
pub use store::{PoolSettings, PostgresInventoryStore};
