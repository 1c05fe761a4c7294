//! In-memory event bus with Kafka-like consumer-group semantics.
//!
//! Each topic is a single append-only log (partition 0). Each
//! `(consumer group, topic)` pair has a committed offset; a new subscription
//! starts there, so whatever a previous subscription received but did not
//! commit is delivered again. Subscriptions stay open and wait for new
//! messages, like a broker consumer would.

use album_store_core::event::Event;
use album_store_core::event_bus::{
    EventBus, EventBusError, InboundMessage, OffsetCommitter, OutboundMessage, Subscription,
};
use album_store_core::trace_context::TraceContext;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct BusState {
    logs: HashMap<String, Vec<InboundMessage>>,
    committed: HashMap<(String, String), i64>,
    subscriptions: HashMap<(String, String), usize>,
    publish_failures: usize,
    subscribe_failures: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BusState>,
    appended: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`EventBus`] for tests.
///
/// # Example
///
/// ```
/// use album_store_testing::InMemoryEventBus;
/// use album_store_core::event_bus::{EventBus, OutboundMessage};
/// use album_store_core::trace_context::TraceContext;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish(&OutboundMessage {
///     topic: "order-succeeded".to_string(),
///     key: "o-1".to_string(),
///     payload: b"{}".to_vec(),
///     trace_context: TraceContext::new(),
/// })
/// .await?;
///
/// assert_eq!(bus.published("order-succeeded").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventBus {
    shared: Arc<Shared>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw message, bypassing encoding. Returns its offset.
    ///
    /// Used to inject payloads no well-behaved producer would send.
    pub fn append_raw(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: impl Into<Vec<u8>>,
        trace_context: TraceContext,
    ) -> i64 {
        let offset = {
            let mut state = self.shared.lock();
            let log = state.logs.entry(topic.to_string()).or_default();
            let offset = i64::try_from(log.len()).unwrap_or(i64::MAX);
            log.push(InboundMessage {
                topic: topic.to_string(),
                partition: 0,
                offset,
                key: key.map(str::to_string),
                payload: payload.into(),
                trace_context,
            });
            offset
        };
        self.shared.appended.notify_waiters();
        offset
    }

    /// Encode and append an event to its home topic. Returns its offset.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the event cannot be encoded.
    pub fn append_event<E: Event>(
        &self,
        event: &E,
        trace_context: TraceContext,
    ) -> Result<i64, EventBusError> {
        let payload = event.to_bytes().map_err(|e| EventBusError::PublishFailed {
            topic: E::TOPIC.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.append_raw(E::TOPIC, Some(event.key()), payload, trace_context))
    }

    /// Everything ever written to `topic`, in order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<InboundMessage> {
        self.shared
            .lock()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Decode everything written to `topic` as `E`, skipping undecodable bodies.
    #[must_use]
    pub fn published_events<E: Event>(&self, topic: &str) -> Vec<E> {
        self.published(topic)
            .iter()
            .filter_map(|message| message.decode::<E>().ok())
            .collect()
    }

    /// Next offset `group` will read on `topic`, if it ever committed.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<i64> {
        self.shared
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
    }

    /// How many subscriptions `group` has opened on `topic`.
    #[must_use]
    pub fn subscription_count(&self, topic: &str, group: &str) -> usize {
        self.shared
            .lock()
            .subscriptions
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: usize) {
        self.shared.lock().publish_failures = count;
    }

    /// Make the next `count` subscribes fail.
    pub fn fail_next_subscribes(&self, count: usize) {
        self.shared.lock().subscribe_failures = count;
    }
}

struct GroupCommitter {
    shared: Arc<Shared>,
    group: String,
}

impl OffsetCommitter for GroupCommitter {
    fn commit(&self, message: &InboundMessage) -> Result<(), EventBusError> {
        self.shared.lock().committed.insert(
            (self.group.clone(), message.topic.clone()),
            message.offset + 1,
        );
        Ok(())
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        message: &OutboundMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let rejected = {
            let mut state = self.shared.lock();
            if state.publish_failures > 0 {
                state.publish_failures -= 1;
                true
            } else {
                false
            }
        };

        let result = if rejected {
            Err(EventBusError::PublishFailed {
                topic: message.topic.clone(),
                reason: "injected publish failure".to_string(),
            })
        } else {
            self.append_raw(
                &message.topic,
                Some(&message.key),
                message.payload.clone(),
                message.trace_context.clone(),
            );
            Ok(())
        };

        Box::pin(async move { result })
    }

    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = consumer_group.to_string();

        Box::pin(async move {
            let start = {
                let mut state = self.shared.lock();
                if state.subscribe_failures > 0 {
                    state.subscribe_failures -= 1;
                    return Err(EventBusError::SubscriptionFailed {
                        topic,
                        reason: "injected subscribe failure".to_string(),
                    });
                }
                let key = (group.clone(), topic.clone());
                *state.subscriptions.entry(key.clone()).or_default() += 1;
                state.committed.get(&key).copied().unwrap_or(0)
            };

            let shared = Arc::clone(&self.shared);
            let stream_topic = topic.clone();
            let messages = async_stream::stream! {
                let mut next = usize::try_from(start).unwrap_or(0);
                loop {
                    let appended = shared.appended.notified();
                    let message = shared
                        .lock()
                        .logs
                        .get(&stream_topic)
                        .and_then(|log| log.get(next))
                        .cloned();
                    match message {
                        Some(message) => {
                            next += 1;
                            yield Ok(message);
                        }
                        None => appended.await,
                    }
                }
            };

            Ok(Subscription::new(
                Box::pin(messages),
                Box::new(GroupCommitter {
                    shared: Arc::clone(&self.shared),
                    group,
                }),
            ))
        })
    }
}
