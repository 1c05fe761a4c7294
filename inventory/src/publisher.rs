//! Outcome publishing.

use album_store_core::event::{EventError, OrderOutcome, topics};
use album_store_core::event_bus::{EventBus, EventBusError, OutboundMessage};
use album_store_core::trace_context::TraceContext;
use album_store_runtime::metrics::EventBusMetrics;
use album_store_runtime::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors publishing an outcome.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The outcome could not be encoded.
    #[error(transparent)]
    Encode(#[from] EventError),

    /// The bus rejected every attempt.
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

/// Topics the two outcome variants are routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeTopics {
    /// Destination of `order-succeeded`.
    pub succeeded: String,
    /// Destination of `order-failed`.
    pub failed: String,
}

impl Default for OutcomeTopics {
    fn default() -> Self {
        Self {
            succeeded: topics::ORDER_SUCCEEDED.to_string(),
            failed: topics::ORDER_FAILED.to_string(),
        }
    }
}

/// Publishes outcome events keyed by order id, with retries.
#[derive(Clone)]
pub struct OutcomePublisher {
    event_bus: Arc<dyn EventBus>,
    topics: OutcomeTopics,
    retry: RetryPolicy,
}

impl OutcomePublisher {
    /// Publisher on the default topics with the default retry policy.
    #[must_use]
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            event_bus,
            topics: OutcomeTopics::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Route outcomes to `topics`.
    #[must_use]
    pub fn with_topics(mut self, topics: OutcomeTopics) -> Self {
        self.topics = topics;
        self
    }

    /// Retry failed publishes according to `retry`.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Encode `outcome` and publish it with `trace_context` as headers.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Encode`] if the outcome cannot be serialized, or
    /// [`PublishError::Bus`] with the last bus error once retries are spent.
    pub async fn publish(
        &self,
        outcome: &OrderOutcome,
        trace_context: &TraceContext,
    ) -> Result<(), PublishError> {
        let topic = match outcome {
            OrderOutcome::Succeeded(_) => &self.topics.succeeded,
            OrderOutcome::Failed(_) => &self.topics.failed,
        };

        let message = OutboundMessage {
            topic: topic.clone(),
            key: outcome.order_id().to_string(),
            payload: outcome.to_bytes()?,
            trace_context: trace_context.clone(),
        };

        retry_with_backoff(self.retry.clone(), || self.publish_once(&message)).await?;
        Ok(())
    }

    async fn publish_once(&self, message: &OutboundMessage) -> Result<(), EventBusError> {
        let started = Instant::now();
        match self.event_bus.publish(message).await {
            Ok(()) => {
                EventBusMetrics::record_publish(&message.topic, started.elapsed());
                tracing::debug!(topic = %message.topic, key = %message.key, "Outcome published");
                Ok(())
            }
            Err(e) => {
                EventBusMetrics::record_publish_error(&message.topic);
                Err(e)
            }
        }
    }
}
