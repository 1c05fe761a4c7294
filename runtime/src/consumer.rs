//! Event bus consumer with commit-after-handle and redelivery.
//!
//! `EventConsumer` owns the subscribe → handle → commit loop for one topic and
//! one consumer group. Handlers only decide what a message means; the consumer
//! decides what happens to its offset.
//!
//! # Pattern: Subscribe-Handle-Commit Loop
//!
//! ```text
//! loop {
//!     subscribe(topic, group)
//!     loop {
//!         next message (in arrival order)
//!         handle
//!             Ok(Processed | Skipped)  -> commit, continue
//!             Err(Transient)           -> stop, do NOT commit
//!     }
//!     back off (exponential in consecutive failures)
//!     drop subscription -> broker redelivers from the last commit
//! }
//! ```
//!
//! A message is therefore never committed before its handler has finished
//! with it, and a transient failure never skips a message: the same message
//! is the first one the next subscription yields. Handlers report undecodable
//! payloads as [`Disposition::Skipped`].
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("reservation")
//!     .topic("order-created")
//!     .consumer_group("inventory-service-consumers")
//!     .event_bus(event_bus)
//!     .handler(coordinator)
//!     .shutdown(shutdown_rx)
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! ```

use crate::metrics::ConsumerMetrics;
use crate::retry::RetryPolicy;
use album_store_core::event_bus::{EventBus, InboundMessage, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{Instrument, error, info, info_span, warn};

/// What a handler did with a message. Both variants are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The message was acted on.
    Processed,
    /// The message was deliberately ignored (malformed or irrelevant).
    Skipped,
}

impl Disposition {
    /// Metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
        }
    }
}

/// A handler failure that must leave the message uncommitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// A dependency is temporarily unavailable; the message will be redelivered.
    #[error("Transient failure: {0}")]
    Transient(String),
}

/// Processes messages from one topic.
///
/// # Contract
///
/// - Return `Ok` once the message is fully dealt with, including when it was
///   ignored. The consumer then commits it.
/// - Return [`HandlerError::Transient`] when no durable effect of the message
///   has been made and it should be seen again.
/// - Handlers must tolerate seeing a message they already processed: a commit
///   can be lost after a successful handle.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Transient`] to request redelivery.
    async fn handle(&self, message: &InboundMessage) -> Result<Disposition, HandlerError>;
}

/// Errors building an [`EventConsumer`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerBuildError {
    /// A required builder field was not set.
    #[error("Missing required consumer field: {0}")]
    MissingField(&'static str),
}

enum StreamExit {
    Shutdown,
    Interrupted,
}

/// Consumer for one topic in one consumer group.
///
/// # Lifecycle
///
/// 1. Created via [`EventConsumer::builder`]
/// 2. Spawned as background task via [`EventConsumer::spawn`]
/// 3. Runs until the shutdown channel fires or closes. A handler already
///    running is allowed to finish and its message is committed.
pub struct EventConsumer {
    name: String,
    topic: String,
    consumer_group: String,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn MessageHandler>,
    shutdown: broadcast::Receiver<()>,
    backoff: RetryPolicy,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the consumer on the current task until shutdown.
    pub async fn run(mut self) {
        info!(consumer = %self.name, topic = %self.topic, group = %self.consumer_group, "Event consumer started");

        let mut consecutive_failures: usize = 0;

        loop {
            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.event_bus.subscribe(&self.topic, &self.consumer_group) => result,
            };

            match subscribed {
                Ok(mut subscription) => {
                    if consecutive_failures > 0 {
                        ConsumerMetrics::record_resubscribe(&self.topic);
                    }
                    info!(consumer = %self.name, topic = %self.topic, "Subscribed");

                    match self.process(&mut subscription, &mut consecutive_failures).await {
                        StreamExit::Shutdown => break,
                        StreamExit::Interrupted => {}
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(consumer = %self.name, topic = %self.topic, error = %e, "Failed to subscribe");
                }
            }

            let delay = self.backoff_delay(consecutive_failures);
            warn!(
                consumer = %self.name,
                topic = %self.topic,
                consecutive_failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Resubscribing after backoff"
            );

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(consumer = %self.name, topic = %self.topic, "Event consumer stopped");
    }

    fn backoff_delay(&self, consecutive_failures: usize) -> Duration {
        self.backoff
            .delay_for_attempt(consecutive_failures.saturating_sub(1))
    }

    /// Drain `subscription` until shutdown or until a message cannot be
    /// committed in good conscience.
    async fn process(
        &mut self,
        subscription: &mut Subscription,
        consecutive_failures: &mut usize,
    ) -> StreamExit {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.recv() => return StreamExit::Shutdown,
                next = subscription.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    *consecutive_failures += 1;
                    error!(consumer = %self.name, topic = %self.topic, error = %e, "Error receiving from subscription");
                    return StreamExit::Interrupted;
                }
                None => {
                    *consecutive_failures += 1;
                    warn!(consumer = %self.name, topic = %self.topic, "Subscription ended");
                    return StreamExit::Interrupted;
                }
            };

            let span = info_span!(
                "consume",
                consumer = %self.name,
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
            );
            let started = Instant::now();

            match self.handler.handle(&message).instrument(span.clone()).await {
                Ok(disposition) => {
                    if let Err(e) = subscription.commit(&message) {
                        ConsumerMetrics::record_commit_error(&self.topic);
                        span.in_scope(|| warn!(error = %e, "Offset commit failed"));
                    }
                    ConsumerMetrics::record_handled(
                        &self.topic,
                        disposition.as_str(),
                        started.elapsed(),
                    );
                    *consecutive_failures = 0;
                }
                Err(HandlerError::Transient(reason)) => {
                    *consecutive_failures += 1;
                    ConsumerMetrics::record_transient_failure(&self.topic);
                    span.in_scope(|| {
                        warn!(reason = %reason, "Transient handler failure, message left for redelivery");
                    });
                    return StreamExit::Interrupted;
                }
            }
        }
    }
}

/// Builder for configuring an [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn MessageHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    backoff: Option<RetryPolicy>,
}

impl EventConsumerBuilder {
    /// Set consumer name (for logging).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the topic to consume.
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group.
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set message handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the resubscribe backoff (default: 500ms doubling up to 30s).
    #[must_use]
    pub fn backoff(mut self, backoff: RetryPolicy) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Build the [`EventConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerBuildError::MissingField`] if a required field is unset.
    pub fn build(self) -> Result<EventConsumer, ConsumerBuildError> {
        Ok(EventConsumer {
            name: self.name.ok_or(ConsumerBuildError::MissingField("name"))?,
            topic: self.topic.ok_or(ConsumerBuildError::MissingField("topic"))?,
            consumer_group: self
                .consumer_group
                .ok_or(ConsumerBuildError::MissingField("consumer_group"))?,
            event_bus: self
                .event_bus
                .ok_or(ConsumerBuildError::MissingField("event_bus"))?,
            handler: self
                .handler
                .ok_or(ConsumerBuildError::MissingField("handler"))?,
            shutdown: self
                .shutdown
                .ok_or(ConsumerBuildError::MissingField("shutdown"))?,
            backoff: self.backoff.unwrap_or_else(|| {
                RetryPolicy::builder()
                    .initial_delay(Duration::from_millis(500))
                    .max_delay(Duration::from_secs(30))
                    .build()
            }),
        })
    }
}
