//! Event bus abstraction with consumer-controlled acknowledgement.
//!
//! # Delivery contract
//!
//! - **At-least-once**: a message is redelivered until a subscriber of its
//!   consumer group commits it
//! - **Ordered within a partition**: a subscription yields messages in arrival
//!   order; each topic is consumed through a single partition here
//! - **Commit after handling**: callers commit only once their handler has
//!   finished with a message, never on receipt
//!
//! ```text
//! subscribe(topic, group) ──► next() ──► handle ──► commit(msg)
//!                               ▲                      │
//!                               └──────────────────────┘
//!        drop without commit ──► next subscription starts at the message again
//! ```
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `album-store-testing` - for tests
//! - `RedpandaEventBus` in `album-store-redpanda` - for production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! use album_store_core::event_bus::{EventBus, OutboundMessage};
//!
//! async fn example(bus: &dyn EventBus) -> Result<(), EventBusError> {
//!     let mut subscription = bus.subscribe("order-created", "inventory").await?;
//!     while let Some(message) = subscription.next().await {
//!         let message = message?;
//!         handle(&message).await;
//!         subscription.commit(&message)?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::{Event, EventError};
use crate::trace_context::TraceContext;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to a topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to commit a consumed offset
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message received from the bus.
///
/// The payload is left undecoded so that a consumer can decide how to treat a
/// body it cannot parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, if any.
    pub key: Option<String>,
    /// Raw body.
    pub payload: Vec<u8>,
    /// Headers, carried opaquely.
    pub trace_context: TraceContext,
}

impl InboundMessage {
    /// Decode the payload as `E`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] for an unparseable body.
    pub fn decode<E: Event>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.payload)
    }
}

/// A message ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic.
    pub topic: String,
    /// Partition key.
    pub key: String,
    /// Encoded body.
    pub payload: Vec<u8>,
    /// Headers to attach.
    pub trace_context: TraceContext,
}

impl OutboundMessage {
    /// Encode an event for its home topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn from_event<E: Event>(event: &E, trace_context: TraceContext) -> Result<Self, EventError> {
        Ok(Self {
            topic: E::TOPIC.to_string(),
            key: event.key().to_string(),
            payload: event.to_bytes()?,
            trace_context,
        })
    }
}

/// Stream of messages from a subscription.
pub type MessageStream =
    Pin<Box<dyn Stream<Item = Result<InboundMessage, EventBusError>> + Send>>;

/// Marks messages as consumed for a consumer group.
pub trait OffsetCommitter: Send + Sync {
    /// Record `message` as consumed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the broker rejects the commit.
    fn commit(&self, message: &InboundMessage) -> Result<(), EventBusError>;
}

/// A live subscription of one consumer group to one topic.
///
/// Dropping the subscription releases the group membership; anything not
/// committed will be delivered again to the next subscriber.
pub struct Subscription {
    messages: MessageStream,
    committer: Box<dyn OffsetCommitter>,
}

impl Subscription {
    /// Assemble a subscription from its stream and commit handle.
    #[must_use]
    pub fn new(messages: MessageStream, committer: Box<dyn OffsetCommitter>) -> Self {
        Self {
            messages,
            committer,
        }
    }

    /// Next message in arrival order; `None` when the stream has ended.
    pub async fn next(&mut self) -> Option<Result<InboundMessage, EventBusError>> {
        self.messages.next().await
    }

    /// Mark `message` consumed.
    ///
    /// # Errors
    ///
    /// Propagates [`OffsetCommitter::commit`] failures.
    pub fn commit(&self, message: &InboundMessage) -> Result<(), EventBusError> {
        self.committer.commit(message)
    }
}

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so that
/// the bus can be shared as `Arc<dyn EventBus>` between the coordinator, the
/// listener and the consumer loops.
pub trait EventBus: Send + Sync {
    /// Publish a message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker does not accept it.
    fn publish(
        &self,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Join `consumer_group` on `topic`.
    ///
    /// Delivery resumes after the group's last committed message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{OrderCreated, topics};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    struct RecordingCommitter(Arc<Mutex<Vec<i64>>>);

    impl OffsetCommitter for RecordingCommitter {
        fn commit(&self, message: &InboundMessage) -> Result<(), EventBusError> {
            self.0.lock().unwrap().push(message.offset);
            Ok(())
        }
    }

    fn message(offset: i64) -> InboundMessage {
        InboundMessage {
            topic: topics::ORDER_CREATED.to_string(),
            partition: 0,
            offset,
            key: None,
            payload: b"{}".to_vec(),
            trace_context: TraceContext::new(),
        }
    }

    #[test]
    fn outbound_from_event_uses_home_topic_and_key() {
        let event = OrderCreated {
            order_id: "o-9".to_string(),
            album_id: "a".to_string(),
            quantity: 1,
            user_id: "u".to_string(),
            timestamp: Utc::now(),
        };
        let ctx = TraceContext::new().with("traceparent", "00-x-y-01");
        let outbound = OutboundMessage::from_event(&event, ctx.clone()).unwrap();
        assert_eq!(outbound.topic, topics::ORDER_CREATED);
        assert_eq!(outbound.key, "o-9");
        assert_eq!(outbound.trace_context, ctx);
    }

    #[tokio::test]
    async fn subscription_yields_in_order_and_commits() {
        let committed = Arc::new(Mutex::new(Vec::new()));
        let stream = futures::stream::iter(vec![Ok(message(0)), Ok(message(1))]);
        let mut subscription = Subscription::new(
            Box::pin(stream),
            Box::new(RecordingCommitter(Arc::clone(&committed))),
        );

        while let Some(next) = subscription.next().await {
            let next = next.unwrap();
            subscription.commit(&next).unwrap();
        }

        assert_eq!(*committed.lock().unwrap(), vec![0, 1]);
    }
}
