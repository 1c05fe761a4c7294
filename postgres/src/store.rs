//! `PostgresInventoryStore`.

use crate::error::map_sqlx_error;
use album_store_core::inventory::{
    InventoryLedger, InventoryStore, LedgerEntry, ProcessedOrder, ProcessedOrders,
    ProcessedStatus, RejectionCause, Reservation, StoreError, StoreFuture,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of idle connections kept open.
    pub min_connections: u32,
    /// How long to wait for a free connection before giving up.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

type LedgerRow = (String, i32, DateTime<Utc>);

fn ledger_entry((album_id, quantity_available, last_updated): LedgerRow) -> LedgerEntry {
    LedgerEntry {
        album_id,
        quantity_available,
        last_updated,
    }
}

/// Ledger and Processed-Order Record on a `PgPool`.
#[derive(Clone, Debug)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be established.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// Create the `inventory` and `processed_orders` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Query(format!("Migration failed: {e}")))?;
        tracing::info!("Inventory schema is up to date");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Verify the database answers.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the round trip fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(map_sqlx_error)
    }

    async fn reserve_in_transaction(
        &self,
        order_id: &str,
        album_id: &str,
        quantity: i32,
    ) -> Result<Reservation, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to begin transaction: {e}")))?;

        // A concurrent claim of the same order blocks here until the other
        // transaction ends, then sees the conflict.
        let claimed = sqlx::query(
            "INSERT INTO processed_orders (order_id, status, processed_at)
             VALUES ($1, 'PENDING', NOW())
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(Reservation::AlreadyProcessed);
        }

        let rejection = if quantity <= 0 {
            Some(RejectionCause::InvalidQuantity)
        } else {
            let updated = sqlx::query(
                "UPDATE inventory
                 SET quantity_available = quantity_available - $1, last_updated = NOW()
                 WHERE album_id = $2 AND quantity_available >= $1",
            )
            .bind(quantity)
            .bind(album_id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            if updated.rows_affected() == 1 {
                None
            } else {
                let available: Option<(i32,)> =
                    sqlx::query_as("SELECT quantity_available FROM inventory WHERE album_id = $1")
                        .bind(album_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;

                Some(available.map_or(RejectionCause::UnknownItem, |(available,)| {
                    RejectionCause::InsufficientStock { available }
                }))
            }
        };

        let (reservation, status) = match rejection {
            None => (Reservation::Reserved, ProcessedStatus::Succeeded),
            Some(cause) => (
                Reservation::Rejected(cause),
                ProcessedStatus::Failed(cause.reason()),
            ),
        };

        sqlx::query("UPDATE processed_orders SET status = $2, reason = $3 WHERE order_id = $1")
            .bind(order_id)
            .bind(status.as_str())
            .bind(status.reason().map(|reason| reason.as_str()))
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to commit reservation: {e}")))?;

        Ok(reservation)
    }
}

impl InventoryLedger for PostgresInventoryStore {
    fn try_decrement<'a>(&'a self, album_id: &'a str, quantity: i32) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if quantity <= 0 {
                return Err(StoreError::InvalidQuantity(quantity));
            }

            let result = sqlx::query(
                "UPDATE inventory
                 SET quantity_available = quantity_available - $1, last_updated = NOW()
                 WHERE album_id = $2 AND quantity_available >= $1",
            )
            .bind(quantity)
            .bind(album_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn upsert_if_absent<'a>(
        &'a self,
        album_id: &'a str,
        initial_quantity: i32,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            if initial_quantity < 0 {
                return Err(StoreError::InvalidQuantity(initial_quantity));
            }

            let result = sqlx::query(
                "INSERT INTO inventory (album_id, quantity_available, last_updated)
                 VALUES ($1, $2, NOW())
                 ON CONFLICT (album_id) DO NOTHING",
            )
            .bind(album_id)
            .bind(initial_quantity)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn get<'a>(&'a self, album_id: &'a str) -> StoreFuture<'a, Option<LedgerEntry>> {
        Box::pin(async move {
            let row: Option<LedgerRow> = sqlx::query_as(
                "SELECT album_id, quantity_available, last_updated
                 FROM inventory WHERE album_id = $1",
            )
            .bind(album_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(row.map(ledger_entry))
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<LedgerEntry>> {
        Box::pin(async move {
            let rows: Vec<LedgerRow> = sqlx::query_as(
                "SELECT album_id, quantity_available, last_updated
                 FROM inventory ORDER BY album_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(rows.into_iter().map(ledger_entry).collect())
        })
    }

    fn set_quantity<'a>(
        &'a self,
        album_id: &'a str,
        quantity: i32,
    ) -> StoreFuture<'a, LedgerEntry> {
        Box::pin(async move {
            if quantity < 0 {
                return Err(StoreError::InvalidQuantity(quantity));
            }

            let row: LedgerRow = sqlx::query_as(
                "INSERT INTO inventory (album_id, quantity_available, last_updated)
                 VALUES ($1, $2, NOW())
                 ON CONFLICT (album_id)
                 DO UPDATE SET quantity_available = EXCLUDED.quantity_available,
                               last_updated = NOW()
                 RETURNING album_id, quantity_available, last_updated",
            )
            .bind(album_id)
            .bind(quantity)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            tracing::info!(album_id, quantity, "Inventory quantity overwritten");
            Ok(ledger_entry(row))
        })
    }
}

impl ProcessedOrders for PostgresInventoryStore {
    fn exists<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS(SELECT 1 FROM processed_orders WHERE order_id = $1)")
                    .bind(order_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;
            Ok(exists)
        })
    }

    fn mark_processed<'a>(
        &'a self,
        order_id: &'a str,
        status: ProcessedStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO processed_orders (order_id, status, reason, processed_at)
                 VALUES ($1, $2, $3, NOW())
                 ON CONFLICT (order_id) DO NOTHING",
            )
            .bind(order_id)
            .bind(status.as_str())
            .bind(status.reason().map(|reason| reason.as_str()))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(result.rows_affected() == 1)
        })
    }

    fn get_processed<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<ProcessedOrder>> {
        Box::pin(async move {
            let row: Option<(String, Option<String>, Option<String>, DateTime<Utc>)> = sqlx::query_as(
                "SELECT order_id, status, reason, processed_at
                 FROM processed_orders WHERE order_id = $1",
            )
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.map(|(order_id, status, reason, processed_at)| {
                Ok(ProcessedOrder {
                    order_id,
                    status: ProcessedStatus::from_columns(status.as_deref(), reason.as_deref())?,
                    processed_at,
                })
            })
            .transpose()
        })
    }
}

impl InventoryStore for PostgresInventoryStore {
    fn reserve_for_order<'a>(
        &'a self,
        order_id: &'a str,
        album_id: &'a str,
        quantity: i32,
    ) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            let started = Instant::now();
            let result = self.reserve_in_transaction(order_id, album_id, quantity).await;

            metrics::histogram!("inventory_store_reserve_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            if let Err(e) = &result {
                metrics::counter!("inventory_store_reserve_errors_total").increment(1);
                tracing::warn!(order_id, album_id, error = %e, "Reservation transaction failed");
            }

            result
        })
    }
}
