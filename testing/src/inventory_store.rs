//! In-memory Ledger and Processed-Order Record.
//!
//! Every operation takes one lock, so the conditional decrement and the
//! reservation unit of work are atomic the same way a single SQL statement or
//! transaction is. Faults can be injected to exercise redelivery paths.

use album_store_core::environment::{Clock, SystemClock};
use album_store_core::inventory::{
    InventoryLedger, InventoryStore, LedgerEntry, ProcessedOrder, ProcessedOrders,
    ProcessedStatus, RejectionCause, Reservation, StoreError, StoreFuture,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StoreState {
    ledger: HashMap<String, LedgerEntry>,
    processed: HashMap<String, ProcessedOrder>,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    fail_next: usize,
    reject_next: usize,
}

/// In-memory [`InventoryStore`] for tests.
///
/// # Example
///
/// ```
/// use album_store_testing::InMemoryInventoryStore;
/// use album_store_core::inventory::InventoryLedger;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryInventoryStore::new();
/// store.seed("album-1", 2);
///
/// assert!(store.try_decrement("album-1", 2).await?);
/// assert!(!store.try_decrement("album-1", 1).await?);
/// assert_eq!(store.quantity("album-1"), Some(0));
/// # Ok(())
/// # }
/// ```
pub struct InMemoryInventoryStore {
    state: Mutex<StoreState>,
    faults: Mutex<Faults>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryInventoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryInventoryStore")
            .field("state", &self.state)
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl InMemoryInventoryStore {
    /// Create an empty store using wall-clock time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping rows with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            faults: Mutex::new(Faults::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume one injected fault, if any.
    fn check_available(&self) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if faults.unavailable {
            return Err(StoreError::Unavailable("store marked unavailable".to_string()));
        }
        if faults.fail_next > 0 {
            faults.fail_next -= 1;
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        if faults.reject_next > 0 {
            faults.reject_next -= 1;
            return Err(StoreError::Query("injected statement failure".to_string()));
        }
        Ok(())
    }

    /// Insert or overwrite a Ledger row directly.
    pub fn seed(&self, album_id: &str, quantity: i32) {
        let now = self.clock.now();
        self.lock().ledger.insert(
            album_id.to_string(),
            LedgerEntry {
                album_id: album_id.to_string(),
                quantity_available: quantity,
                last_updated: now,
            },
        );
    }

    /// Current quantity of one row.
    #[must_use]
    pub fn quantity(&self, album_id: &str) -> Option<i32> {
        self.lock()
            .ledger
            .get(album_id)
            .map(|entry| entry.quantity_available)
    }

    /// Number of processed-order markers.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        self.lock().processed.len()
    }

    /// Fail every operation until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unavailable = unavailable;
    }

    /// Fail the next `count` operations.
    pub fn fail_next(&self, count: usize) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fail_next = count;
    }

    /// Fail the next `count` operations with [`StoreError::Query`], the way a
    /// statement the database will never accept fails.
    pub fn reject_next(&self, count: usize) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reject_next = count;
    }

    fn decrement_locked(
        state: &mut StoreState,
        album_id: &str,
        quantity: i32,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RejectionCause> {
        match state.ledger.get_mut(album_id) {
            None => Err(RejectionCause::UnknownItem),
            Some(entry) if entry.quantity_available >= quantity => {
                entry.quantity_available -= quantity;
                entry.last_updated = now;
                Ok(())
            }
            Some(entry) => Err(RejectionCause::InsufficientStock {
                available: entry.quantity_available,
            }),
        }
    }
}

impl InventoryLedger for InMemoryInventoryStore {
    fn try_decrement<'a>(&'a self, album_id: &'a str, quantity: i32) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            if quantity <= 0 {
                return Err(StoreError::InvalidQuantity(quantity));
            }
            let now = self.clock.now();
            Ok(Self::decrement_locked(&mut self.lock(), album_id, quantity, now).is_ok())
        })
    }

    fn upsert_if_absent<'a>(
        &'a self,
        album_id: &'a str,
        initial_quantity: i32,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            if initial_quantity < 0 {
                return Err(StoreError::InvalidQuantity(initial_quantity));
            }
            let now = self.clock.now();
            let mut state = self.lock();
            if state.ledger.contains_key(album_id) {
                return Ok(false);
            }
            state.ledger.insert(
                album_id.to_string(),
                LedgerEntry {
                    album_id: album_id.to_string(),
                    quantity_available: initial_quantity,
                    last_updated: now,
                },
            );
            Ok(true)
        })
    }

    fn get<'a>(&'a self, album_id: &'a str) -> StoreFuture<'a, Option<LedgerEntry>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().ledger.get(album_id).cloned())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<LedgerEntry>> {
        Box::pin(async move {
            self.check_available()?;
            let mut entries: Vec<LedgerEntry> = self.lock().ledger.values().cloned().collect();
            entries.sort_by(|a, b| a.album_id.cmp(&b.album_id));
            Ok(entries)
        })
    }

    fn set_quantity<'a>(
        &'a self,
        album_id: &'a str,
        quantity: i32,
    ) -> StoreFuture<'a, LedgerEntry> {
        Box::pin(async move {
            self.check_available()?;
            if quantity < 0 {
                return Err(StoreError::InvalidQuantity(quantity));
            }
            let entry = LedgerEntry {
                album_id: album_id.to_string(),
                quantity_available: quantity,
                last_updated: self.clock.now(),
            };
            self.lock()
                .ledger
                .insert(album_id.to_string(), entry.clone());
            Ok(entry)
        })
    }
}

impl ProcessedOrders for InMemoryInventoryStore {
    fn exists<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().processed.contains_key(order_id))
        })
    }

    fn mark_processed<'a>(
        &'a self,
        order_id: &'a str,
        status: ProcessedStatus,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.lock();
            if state.processed.contains_key(order_id) {
                return Ok(false);
            }
            state.processed.insert(
                order_id.to_string(),
                ProcessedOrder {
                    order_id: order_id.to_string(),
                    status,
                    processed_at: now,
                },
            );
            Ok(true)
        })
    }

    fn get_processed<'a>(&'a self, order_id: &'a str) -> StoreFuture<'a, Option<ProcessedOrder>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.lock().processed.get(order_id).cloned())
        })
    }
}

impl InventoryStore for InMemoryInventoryStore {
    fn reserve_for_order<'a>(
        &'a self,
        order_id: &'a str,
        album_id: &'a str,
        quantity: i32,
    ) -> StoreFuture<'a, Reservation> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.lock();

            if state.processed.contains_key(order_id) {
                return Ok(Reservation::AlreadyProcessed);
            }

            let result = if quantity <= 0 {
                Err(RejectionCause::InvalidQuantity)
            } else {
                Self::decrement_locked(&mut state, album_id, quantity, now)
            };

            let (reservation, status) = match result {
                Ok(()) => (Reservation::Reserved, ProcessedStatus::Succeeded),
                Err(cause) => (
                    Reservation::Rejected(cause),
                    ProcessedStatus::Failed(cause.reason()),
                ),
            };

            state.processed.insert(
                order_id.to_string(),
                ProcessedOrder {
                    order_id: order_id.to_string(),
                    status,
                    processed_at: now,
                },
            );
            Ok(reservation)
        })
    }
}
