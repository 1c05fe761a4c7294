//! Prometheus metrics.
//!
//! Metric families:
//! - consumer loop: messages handled, transient failures, resubscribes
//! - event bus publish
//! - reservation outcomes and catalog bootstrap
//! - retry
//!
//! The services expose [`PrometheusMetrics::render`] on their own HTTP port
//! rather than running a separate exporter listener.
//!
//! # Example
//!
//! ```rust,no_run
//! use album_store_runtime::metrics::PrometheusMetrics;
//!
//! # fn example() -> Result<(), album_store_runtime::metrics::MetricsError> {
//! let metrics = PrometheusMetrics::install()?;
//! let text = metrics.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle onto the Prometheus recorder.
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: PrometheusHandle,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl PrometheusMetrics {
    /// Install the global recorder and register metric descriptions.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a global recorder already exists.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = builder()?
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Prometheus recorder installed");
        Ok(Self { handle })
    }

    /// A recorder that is not installed globally.
    ///
    /// Renders only what is recorded through it explicitly; used where a
    /// global recorder would collide, such as parallel tests.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter configuration is rejected.
    pub fn detached() -> Result<Self, MetricsError> {
        let recorder = builder()?.build_recorder();
        Ok(Self {
            handle: recorder.handle(),
        })
    }

    /// Render current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register all metric descriptions.
fn register_metrics() {
    // Consumer loop
    describe_counter!(
        "consumer_messages_total",
        "Messages handled and committed, by topic and disposition"
    );
    describe_counter!(
        "consumer_transient_failures_total",
        "Messages left uncommitted for redelivery"
    );
    describe_counter!(
        "consumer_resubscribes_total",
        "Subscriptions re-established after a failure"
    );
    describe_counter!(
        "consumer_commit_errors_total",
        "Offset commits rejected by the broker"
    );
    describe_histogram!(
        "consumer_handle_duration_seconds",
        "Time spent in a message handler"
    );

    // Event bus
    describe_counter!(
        "event_bus_messages_published_total",
        "Messages accepted by the broker"
    );
    describe_counter!(
        "event_bus_publish_errors_total",
        "Publish attempts rejected by the broker"
    );
    describe_histogram!(
        "event_bus_publish_duration_seconds",
        "Time taken to publish messages"
    );

    // Reservation
    describe_counter!(
        "reservation_outcomes_total",
        "Orders resolved, by outcome and reason"
    );
    describe_counter!(
        "reservation_duplicates_total",
        "Order-created deliveries for orders already resolved"
    );
    describe_counter!(
        "reservation_malformed_total",
        "Order-created payloads that could not be decoded"
    );
    describe_counter!(
        "reservation_outcome_publish_abandoned_total",
        "Outcomes recorded in storage but never published"
    );
    describe_counter!(
        "reservation_unprocessable_total",
        "Orders skipped after a storage error that retrying cannot fix"
    );

    // Catalog bootstrap
    describe_counter!(
        "ledger_bootstrap_total",
        "Album-created events applied to the ledger, by result"
    );

    // Retry
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_successes_total",
        "Operations that succeeded after at least one retry"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Operations that failed after max retries"
    );
}

/// Consumer loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a message handled and committed.
    pub fn record_handled(topic: &str, disposition: &'static str, duration: Duration) {
        counter!(
            "consumer_messages_total",
            "topic" => topic.to_owned(),
            "disposition" => disposition
        )
        .increment(1);
        histogram!("consumer_handle_duration_seconds", "topic" => topic.to_owned())
            .record(duration.as_secs_f64());
    }

    /// Record a message left for redelivery.
    pub fn record_transient_failure(topic: &str) {
        counter!("consumer_transient_failures_total", "topic" => topic.to_owned()).increment(1);
    }

    /// Record a resubscription.
    pub fn record_resubscribe(topic: &str) {
        counter!("consumer_resubscribes_total", "topic" => topic.to_owned()).increment(1);
    }

    /// Record a failed commit.
    pub fn record_commit_error(topic: &str) {
        counter!("consumer_commit_errors_total", "topic" => topic.to_owned()).increment(1);
    }
}

/// Event bus metrics recorder.
pub struct EventBusMetrics;

impl EventBusMetrics {
    /// Record a message publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("event_bus_messages_published_total", "topic" => topic.to_owned()).increment(1);
        histogram!("event_bus_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish error.
    pub fn record_publish_error(topic: &str) {
        counter!("event_bus_publish_errors_total", "topic" => topic.to_owned()).increment(1);
    }
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record a first resolution.
    pub fn record_outcome(outcome: &'static str, reason: &'static str) {
        counter!("reservation_outcomes_total", "outcome" => outcome, "reason" => reason)
            .increment(1);
    }

    /// Record a redelivered order that was already resolved.
    pub fn record_duplicate() {
        counter!("reservation_duplicates_total").increment(1);
    }

    /// Record an undecodable order-created payload.
    pub fn record_malformed() {
        counter!("reservation_malformed_total").increment(1);
    }

    /// Record an outcome that exhausted its publish retries.
    pub fn record_publish_abandoned() {
        counter!("reservation_outcome_publish_abandoned_total").increment(1);
    }

    /// Record an order skipped after a non-transient storage error.
    pub fn record_unprocessable() {
        counter!("reservation_unprocessable_total").increment(1);
    }
}

/// Ledger bootstrap metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record an album-created event applied to the ledger.
    ///
    /// `result` is `created`, `existing`, `malformed` or `unprocessable`.
    pub fn record_bootstrap(result: &'static str) {
        counter!("ledger_bootstrap_total", "result" => result).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
