//! Redpanda event bus for the album store services.
//!
//! Implements the [`EventBus`] trait from `album-store-core` on rdkafka, so it
//! works against Redpanda, Apache Kafka or any Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - `enable.auto.commit` is off; nothing is committed on receipt
//! - [`Subscription::commit`] stores `offset + 1` for the message's partition
//!   once the caller has finished with it
//! - each subscription owns its own `StreamConsumer`; dropping the
//!   subscription leaves the group, and the next member resumes from the last
//!   commit, so anything handled-but-uncommitted is delivered again
//! - ordering is guaranteed within a partition
//!
//! # Headers
//!
//! Message headers travel as the [`TraceContext`] in both directions, so
//! `traceparent`/`tracestate` written by an upstream producer can be copied
//! onto whatever the consumer publishes next.
//!
//! # Example
//!
//! ```no_run
//! use album_store_redpanda::RedpandaEventBus;
//! use album_store_core::event_bus::EventBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("kafka://localhost:9092")
//!     .auto_offset_reset("earliest")
//!     .build()?;
//!
//! let mut subscription = event_bus
//!     .subscribe("order-created", "inventory-service-consumers")
//!     .await?;
//! while let Some(message) = subscription.next().await {
//!     let message = message?;
//!     // handle ...
//!     subscription.commit(&message)?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use album_store_core::event_bus::{
    EventBus, EventBusError, InboundMessage, OffsetCommitter, OutboundMessage, Subscription,
};
use album_store_core::trace_context::TraceContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Strip a `scheme://` prefix from each comma-separated broker address.
///
/// ```
/// use album_store_redpanda::normalize_brokers;
///
/// assert_eq!(normalize_brokers("kafka://a:9092, b:9093"), "a:9092,b:9093");
/// ```
#[must_use]
pub fn normalize_brokers(brokers: &str) -> String {
    brokers
        .split(',')
        .map(str::trim)
        .filter(|broker| !broker.is_empty())
        .map(|broker| broker.split_once("://").map_or(broker, |(_, address)| address))
        .collect::<Vec<_>>()
        .join(",")
}

/// Redpanda event bus implementation.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Offset reset**: Where new consumer groups start reading (default: "earliest")
///
/// # Example
///
/// ```no_run
/// use album_store_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Normalised broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Consumer session timeout
    session_timeout: Duration,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Broker addresses as handed to rdkafka.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_for(&self, topic: &str, consumer_group: &str) -> Result<StreamConsumer, EventBusError> {
        let session_timeout_ms = self.session_timeout.as_millis().to_string();
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", &session_timeout_ms)
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| EventBusError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| EventBusError::SubscriptionFailed {
                topic: topic.to_string(),
                reason: format!("Failed to subscribe: {e}"),
            })?;

        Ok(consumer)
    }
}

/// Copy an rdkafka message out of the consumer's buffer.
fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let trace_context = message.headers().map_or_else(TraceContext::new, |headers| {
        TraceContext::from_headers(headers.iter().map(|header| (header.key, header.value)))
    });

    InboundMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .and_then(|key| std::str::from_utf8(key).ok())
            .map(str::to_string),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        trace_context,
    }
}

fn to_headers(trace_context: &TraceContext) -> OwnedHeaders {
    trace_context
        .iter()
        .fold(OwnedHeaders::new(), |headers, (key, value)| {
            headers.insert(Header {
                key,
                value: Some(value),
            })
        })
}

/// Commits offsets through the subscription's own consumer.
struct PartitionCommitter {
    consumer: Arc<StreamConsumer>,
}

impl OffsetCommitter for PartitionCommitter {
    fn commit(&self, message: &InboundMessage) -> Result<(), EventBusError> {
        let commit_failed = |reason: String| EventBusError::CommitFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| commit_failed(e.to_string()))?;

        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))?;

        tracing::trace!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Offset committed"
        );
        Ok(())
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses.
    ///
    /// Comma-separated; a `scheme://` prefix on an address is ignored.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode.
    ///
    /// - `acks`: "0" (no acks), "1" (leader ack), "all" (all replicas ack)
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where a consumer group with no committed offset starts reading:
    /// `"earliest"` or `"latest"`.
    ///
    /// Default: "earliest", so that orders created before the first start of
    /// the service are still resolved.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .as_deref()
            .map(normalize_brokers)
            .filter(|brokers| !brokers.is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            auto_offset_reset,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(6)),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::to(&message.topic)
                .payload(&message.payload)
                .key(&message.key)
                .headers(to_headers(&message.trace_context));

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %message.topic,
                        key = %message.key,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %message.topic,
                        key = %message.key,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: message.topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let consumer_group = consumer_group.to_string();

        Box::pin(async move {
            let consumer = Arc::new(self.consumer_for(&topic, &consumer_group)?);

            tracing::info!(
                topic = %topic,
                consumer_group = %consumer_group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            let receiver = Arc::clone(&consumer);
            let messages = async_stream::stream! {
                loop {
                    match receiver.recv().await {
                        Ok(message) => {
                            let inbound = to_inbound(&message);
                            drop(message);
                            yield Ok(inbound);
                        }
                        Err(e) => {
                            yield Err(EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            )));
                        }
                    }
                }
            };

            Ok(Subscription::new(
                Box::pin(messages),
                Box::new(PartitionCommitter { consumer }),
            ))
        })
    }
}
