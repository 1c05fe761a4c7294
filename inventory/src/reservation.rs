//! Reservation Coordinator.
//!
//! Consumes `order-created` and resolves each order exactly once:
//!
//! ```text
//! RECEIVED ──► reserve_for_order (one transaction) ──┬─► Reserved         ──► order-succeeded
//!                                                     ├─► Rejected(cause)  ──► order-failed
//!                                                     └─► AlreadyProcessed ──► (nothing)
//! ```
//!
//! The marker claim, the conditional decrement and the terminal status are a
//! single unit of work in the store, so a redelivered order is recognised
//! before the Ledger is touched. Publishing happens after that unit of work has
//! committed; if every publish attempt fails the order stays resolved without
//! an outcome on the bus and the failure is logged for an operator.
//!
//! Only [`StoreError::Unavailable`] leaves a message for redelivery. Any other
//! store error would fail again on every delivery, so the order is logged,
//! counted and skipped.

use crate::publisher::OutcomePublisher;
use album_store_core::environment::Clock;
use album_store_core::event::{FailureReasonMode, OrderCreated, OrderOutcome};
use album_store_core::event_bus::InboundMessage;
use album_store_core::inventory::{InventoryStore, Reservation, StoreError};
use album_store_core::trace_context::TraceContext;
use album_store_runtime::metrics::ReservationMetrics;
use album_store_runtime::{Disposition, HandlerError, MessageHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, error, info, warn};

/// How one order was resolved by [`ReservationCoordinator::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// First resolution; this outcome was handed to the publisher.
    Resolved(OrderOutcome),
    /// The order had been resolved before; nothing was published.
    Duplicate,
}

/// Turns `order-created` events into exactly one outcome per order.
pub struct ReservationCoordinator {
    store: Arc<dyn InventoryStore>,
    publisher: OutcomePublisher,
    clock: Arc<dyn Clock>,
    failure_reason_mode: FailureReasonMode,
}

impl ReservationCoordinator {
    /// Create a coordinator reporting failures in [`FailureReasonMode::Compatible`].
    #[must_use]
    pub fn new(
        store: Arc<dyn InventoryStore>,
        publisher: OutcomePublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            failure_reason_mode: FailureReasonMode::default(),
        }
    }

    /// Report rejection causes according to `mode`.
    #[must_use]
    pub const fn with_failure_reason_mode(mut self, mode: FailureReasonMode) -> Self {
        self.failure_reason_mode = mode;
        self
    }

    /// Resolve `order` and publish its outcome with `trace_context`.
    ///
    /// # Errors
    ///
    /// Returns the store error when the reservation unit of work did not
    /// commit. Nothing was recorded in that case and the order can be retried.
    pub async fn resolve(
        &self,
        order: &OrderCreated,
        trace_context: &TraceContext,
    ) -> Result<Resolution, StoreError> {
        let reservation = self
            .store
            .reserve_for_order(&order.order_id, &order.album_id, order.quantity)
            .await?;

        let now = self.clock.now();
        let outcome = match reservation {
            Reservation::AlreadyProcessed => {
                ReservationMetrics::record_duplicate();
                info!("Order already resolved, skipping redelivery");
                return Ok(Resolution::Duplicate);
            }
            Reservation::Reserved => {
                ReservationMetrics::record_outcome("succeeded", "none");
                info!(quantity = order.quantity, "Inventory reserved");
                OrderOutcome::succeeded(order.order_id.clone(), now)
            }
            Reservation::Rejected(cause) => {
                let reason = self.failure_reason_mode.report(cause.reason());
                ReservationMetrics::record_outcome("failed", reason.as_str());
                info!(
                    quantity = order.quantity,
                    cause = ?cause,
                    reason = reason.as_str(),
                    "Reservation rejected"
                );
                OrderOutcome::failed(order.order_id.clone(), reason, now)
            }
        };

        if let Err(e) = self.publisher.publish(&outcome, trace_context).await {
            ReservationMetrics::record_publish_abandoned();
            error!(
                topic = outcome.topic(),
                error = %e,
                "Outcome could not be published; order is resolved without an outcome event"
            );
        }

        Ok(Resolution::Resolved(outcome))
    }
}

#[async_trait]
impl MessageHandler for ReservationCoordinator {
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, HandlerError> {
        let order: OrderCreated = match message.decode() {
            Ok(order) => order,
            Err(e) => {
                ReservationMetrics::record_malformed();
                warn!(
                    offset = message.offset,
                    error = %e,
                    "Skipping undecodable order-created payload"
                );
                return Ok(Disposition::Skipped);
            }
        };

        let span = tracing::info_span!(
            "reserve",
            order_id = %order.order_id,
            album_id = %order.album_id,
        );

        match self
            .resolve(&order, &message.trace_context)
            .instrument(span)
            .await
        {
            Ok(Resolution::Resolved(_)) => Ok(Disposition::Processed),
            Ok(Resolution::Duplicate) => Ok(Disposition::Skipped),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Reservation did not commit, leaving order for redelivery");
                Err(HandlerError::Transient(e.to_string()))
            }
            Err(e) => {
                ReservationMetrics::record_unprocessable();
                error!(
                    order_id = %order.order_id,
                    album_id = %order.album_id,
                    error = %e,
                    "Skipping order the store cannot process"
                );
                Ok(Disposition::Skipped)
            }
        }
    }
}
