//! Per-topic broadcast engine.
//!
//! A [`Broadcaster`] owns one [`MessageStore`] and one
//! [`SubscriberRegistry`]. Appends, fan-out and subscriber registration run
//! inside a single critical section, so every subscriber sees each message
//! exactly once: either in its replay or live, never both.

use crate::message::{
    now_millis, sanitize_text, IdGenerator, Message, ValidationError, MAX_TEXT_LENGTH,
};
use crate::registry::{
    ChannelSink, Delivery, Registration, Sink, SubscriberId, SubscriberRegistry,
    DEFAULT_SUBSCRIBER_BUFFER,
};
use crate::schema::{Anonymous, Schema};
use crate::store::MessageStore;
use crate::subscription::Subscription;
use bytes::Bytes;
use chirp_protocol::{codec, ConnectionEvent, ProtocolError, PublishRequest, TopicMessage};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Default store capacity for streaming topics.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Failures that are not the caller's fault.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// An event could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(#[from] ProtocolError),

    /// A previous operation panicked while holding the topic lock.
    #[error("Topic state poisoned")]
    Poisoned,
}

/// Publish errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The input was refused; nothing was stored or delivered.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Internal failure.
    #[error(transparent)]
    Internal(#[from] BroadcastError),
}

/// Configuration of one topic.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    /// Topic name, used in logs and metrics.
    pub name: String,
    /// Store capacity. `None` disables trimming.
    pub capacity: Option<usize>,
    /// Longest accepted text, in characters. Longer text is truncated.
    pub max_text_length: usize,
    /// Per-subscriber queue length before the subscriber counts as lagging.
    pub subscriber_buffer: usize,
    /// Use client timestamps instead of the server clock.
    pub trust_client_timestamps: bool,
    /// Send a connection event ahead of the replay.
    pub announce_connection: bool,
}

impl TopicConfig {
    /// Create a configuration with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capacity: Some(DEFAULT_CAPACITY),
            max_text_length: MAX_TEXT_LENGTH,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            trust_client_timestamps: false,
            announce_connection: true,
        }
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_max_text_length(mut self, max_text_length: usize) -> Self {
        self.max_text_length = max_text_length;
        self
    }

    #[must_use]
    pub fn with_subscriber_buffer(mut self, subscriber_buffer: usize) -> Self {
        self.subscriber_buffer = subscriber_buffer;
        self
    }

    #[must_use]
    pub fn with_client_timestamps(mut self, trust: bool) -> Self {
        self.trust_client_timestamps = trust;
        self
    }

    #[must_use]
    pub fn with_connection_event(mut self, announce: bool) -> Self {
        self.announce_connection = announce;
        self
    }
}

/// A stored message together with what publishing it did.
#[derive(Debug, Clone)]
pub struct Published {
    pub message: Arc<Message>,
    /// Store length after the append.
    pub total: usize,
    /// Messages trimmed from the store by this append.
    pub evicted: usize,
    pub delivery: Delivery,
}

/// A sink attached through [`Broadcaster::attach`].
#[derive(Debug)]
pub struct Attached {
    pub registration: Registration,
    /// Store contents at registration time, oldest first.
    pub replay: Vec<Arc<Message>>,
}

/// A poll snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub messages: Vec<Arc<Message>>,
    /// Store length when the snapshot was taken.
    pub total: usize,
}

/// Topic statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopicStats {
    /// Messages currently stored.
    pub messages: usize,
    /// Connected subscribers.
    pub subscribers: usize,
    /// Messages accepted since start.
    pub published: u64,
}

struct TopicState {
    store: MessageStore,
    published: u64,
}

/// The publish/subscribe engine for one topic.
pub struct Broadcaster {
    config: TopicConfig,
    schema: Box<dyn Schema>,
    ids: IdGenerator,
    state: Mutex<TopicState>,
    registry: Arc<SubscriberRegistry>,
}

impl Broadcaster {
    /// Create an anonymous topic with default configuration.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(TopicConfig::new(name), Box::new(Anonymous::default()))
    }

    /// Create a topic with a custom configuration and schema.
    #[must_use]
    pub fn with_config(config: TopicConfig, schema: Box<dyn Schema>) -> Self {
        info!(
            topic = %config.name,
            capacity = ?config.capacity,
            attributor = schema.attributor_field(),
            "Creating topic"
        );
        Self {
            state: Mutex::new(TopicState {
                store: MessageStore::with_capacity(config.capacity),
                published: 0,
            }),
            registry: Arc::new(SubscriberRegistry::new(config.name.clone())),
            ids: IdGenerator::new(),
            schema,
            config,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    /// Name of the attributor field on the wire.
    #[must_use]
    pub fn attributor_field(&self) -> &'static str {
        self.schema.attributor_field()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TopicState>, BroadcastError> {
        self.state.lock().map_err(|_| BroadcastError::Poisoned)
    }

    /// Encode a message as an event frame for this topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn encode(&self, message: &Message) -> Result<Bytes, ProtocolError> {
        codec::encode(&TopicMessage::new(message, self.attributor_field()))
    }

    /// Validate, store and fan out a message.
    ///
    /// Subscribers whose sink refuses the frame are removed; the publish
    /// still succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Invalid`] for empty text or a missing required
    /// attributor, leaving the topic untouched.
    pub fn publish(&self, request: &PublishRequest) -> Result<Published, PublishError> {
        let text = sanitize_text(request.text.as_deref(), self.config.max_text_length)?;
        let seq = self.ids.next_seq();
        let attributor = self
            .schema
            .resolve_attributor(request.supplied_attributor(), seq)?;

        let mut state = self.lock()?;

        let now = now_millis();
        let (base, sent_at) = match request.timestamp {
            Some(ts) if self.config.trust_client_timestamps => (ts, None),
            other => (now, other),
        };
        // Keep timestamps non-decreasing so watermark reads stay exact.
        let timestamp = state.store.last_timestamp().map_or(base, |last| base.max(last));

        let message = Arc::new(Message {
            id: IdGenerator::format(seq, now),
            text,
            timestamp,
            attributor,
            sent_at,
        });
        let frame = self.encode(&message).map_err(BroadcastError::from)?;

        let evicted = state.store.append(Arc::clone(&message));
        state.published += 1;
        let delivery = self.registry.broadcast(&frame);
        let total = state.store.len();
        drop(state);

        trace!(
            topic = %self.config.name,
            id = %message.id,
            recipients = delivery.delivered,
            dropped = delivery.dropped,
            "Published message"
        );

        Ok(Published {
            message,
            total,
            evicted,
            delivery,
        })
    }

    /// Register an arbitrary sink and capture the replay for it.
    ///
    /// Registration and the replay snapshot happen atomically with respect
    /// to publishes: every message is either in `replay` or delivered to the
    /// sink, never both.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic lock is poisoned.
    pub fn attach(&self, sink: Arc<dyn Sink>) -> Result<Attached, BroadcastError> {
        let state = self.lock()?;
        let registration = Registration::new(Arc::clone(&self.registry), sink);
        let replay = state.store.all();
        drop(state);

        Ok(Attached {
            registration,
            replay,
        })
    }

    /// Open a push subscription.
    ///
    /// The returned backlog holds the optional connection event followed by
    /// every stored message; live frames follow on the subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic lock is poisoned or the backlog cannot
    /// be encoded. The subscriber is not left registered in either case.
    pub fn subscribe(&self) -> Result<Subscription, BroadcastError> {
        let (sink, receiver) = ChannelSink::new(self.config.subscriber_buffer);
        let Attached {
            registration,
            replay,
        } = self.attach(Arc::new(sink))?;

        let mut backlog = Vec::with_capacity(replay.len() + 1);
        if self.config.announce_connection {
            backlog.push(codec::encode(&ConnectionEvent::new(now_millis()))?);
        }
        for message in &replay {
            backlog.push(self.encode(message)?);
        }

        debug!(
            topic = %self.config.name,
            subscriber = registration.id(),
            replayed = replay.len(),
            "Subscribed"
        );

        Ok(Subscription::new(
            registration,
            backlog,
            replay.len(),
            receiver,
        ))
    }

    /// Messages newer than `since`, tail-capped to `limit`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic lock is poisoned.
    pub fn list(
        &self,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Snapshot, BroadcastError> {
        let state = self.lock()?;
        Ok(Snapshot {
            messages: state.store.list(since, limit),
            total: state.store.len(),
        })
    }

    /// Remove a subscriber. Unknown handles are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.registry.unregister(id)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Topic statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic lock is poisoned.
    pub fn stats(&self) -> Result<TopicStats, BroadcastError> {
        let state = self.lock()?;
        Ok(TopicStats {
            messages: state.store.len(),
            subscribers: self.registry.len(),
            published: state.published,
        })
    }

    /// Disconnect every subscriber. Stored messages are kept.
    pub fn shutdown(&self) -> usize {
        let removed = self.registry.clear();
        info!(topic = %self.config.name, subscribers = removed, "Topic shut down");
        removed
    }

    /// Poison the topic lock the way a panic inside the critical section
    /// would, so callers can exercise their internal-failure paths.
    #[cfg(any(test, feature = "test-util"))]
    #[doc(hidden)]
    pub fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _state = self.state.lock();
            panic!("topic {} poisoned on request", self.config.name);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MAX_TEXT_LENGTH_LIMIT;
    use crate::registry::SinkError;
    use crate::schema::Named;
    use serde_json::Value;

    fn topic(capacity: usize) -> Broadcaster {
        Broadcaster::with_config(
            TopicConfig::new("test").with_capacity(Some(capacity)),
            Box::new(Anonymous::default()),
        )
    }

    fn publish(topic: &Broadcaster, text: &str) -> Published {
        topic
            .publish(&PublishRequest::text(text).with_attributor("#000000"))
            .unwrap()
    }

    fn decode(frame: &Bytes) -> Value {
        codec::decode(frame).unwrap()
    }

    fn texts(frames: &[Bytes]) -> Vec<String> {
        frames
            .iter()
            .map(decode)
            .filter(|v| v.get("type").is_none())
            .map(|v| v["text"].as_str().unwrap().to_string())
            .collect()
    }

    fn drain(subscription: &mut Subscription) -> Vec<Bytes> {
        std::iter::from_fn(|| subscription.try_recv()).collect()
    }

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn send(&self, _frame: Bytes) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[test]
    fn test_live_delivery_in_publish_order() {
        let topic = topic(100);
        let mut sub = topic.subscribe().unwrap();

        for n in 0..20 {
            publish(&topic, &format!("m{n}"));
        }

        let expected: Vec<String> = (0..20).map(|n| format!("m{n}")).collect();
        assert_eq!(texts(&drain(&mut sub)), expected);
    }

    #[test]
    fn test_replay_then_live() {
        let topic = topic(100);
        publish(&topic, "one");
        publish(&topic, "two");

        let mut sub = topic.subscribe().unwrap();
        assert_eq!(sub.replayed(), 2);

        let backlog = sub.take_backlog();
        assert_eq!(decode(&backlog[0])["type"], "connection");
        assert_eq!(texts(&backlog), vec!["one", "two"]);

        publish(&topic, "three");
        assert_eq!(texts(&drain(&mut sub)), vec!["three"]);
    }

    #[test]
    fn test_capacity_example() {
        let topic = topic(2);
        publish(&topic, "hello");
        publish(&topic, "world");
        let published = publish(&topic, "again");
        assert_eq!(published.total, 2);
        assert_eq!(published.evicted, 1);

        let snapshot = topic.list(None, None).unwrap();
        let stored: Vec<&str> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(stored, vec!["world", "again"]);

        let sub = topic.subscribe().unwrap();
        assert_eq!(texts(sub.backlog()), vec!["world", "again"]);
    }

    #[test]
    fn test_empty_publish_changes_nothing() {
        let topic = topic(10);
        let mut sub = topic.subscribe().unwrap();

        for text in ["", "   ", "\n\t"] {
            let result = topic.publish(&PublishRequest::text(text));
            assert!(matches!(
                result,
                Err(PublishError::Invalid(ValidationError::EmptyMessage))
            ));
        }
        assert!(matches!(
            topic.publish(&PublishRequest::default()),
            Err(PublishError::Invalid(ValidationError::EmptyMessage))
        ));

        assert_eq!(topic.stats().unwrap().messages, 0);
        assert_eq!(topic.stats().unwrap().published, 0);
        assert!(drain(&mut sub).is_empty());
    }

    #[test]
    fn test_long_text_truncated() {
        let topic = topic(10);
        let published = publish(&topic, &"z".repeat(MAX_TEXT_LENGTH * 3));
        assert_eq!(published.message.text.chars().count(), MAX_TEXT_LENGTH);
    }

    #[test]
    fn test_longest_allowed_text_fits_in_a_frame() {
        let topic = Broadcaster::with_config(
            TopicConfig::new("wide").with_max_text_length(MAX_TEXT_LENGTH_LIMIT),
            Box::new(Anonymous::default()),
        );
        // Control characters take the longest JSON escape.
        let request = PublishRequest::text("\u{1}".repeat(MAX_TEXT_LENGTH_LIMIT * 2))
            .with_attributor("\u{1}".repeat(64))
            .with_timestamp(u64::MAX);

        let published = topic.publish(&request).unwrap();
        assert_eq!(published.message.text.chars().count(), MAX_TEXT_LENGTH_LIMIT);
        assert!(topic.encode(&published.message).unwrap().len() <= codec::MAX_EVENT_SIZE);
    }

    #[test]
    fn test_failing_sink_does_not_block_others() {
        let topic = topic(10);
        let mut healthy = topic.subscribe().unwrap();
        let broken = topic.attach(Arc::new(BrokenSink)).unwrap();
        assert_eq!(topic.subscriber_count(), 2);

        let published = publish(&topic, "still delivered");
        assert_eq!(published.delivery, Delivery { delivered: 1, dropped: 1 });
        assert!(!broken.registration.is_active());
        assert_eq!(texts(&drain(&mut healthy)), vec!["still delivered"]);

        // Redundant removal after the inline one.
        assert!(!topic.unsubscribe(broken.registration.id()));
        drop(broken);
        assert_eq!(topic.subscriber_count(), 1);
    }

    struct PanickingSink;

    impl Sink for PanickingSink {
        fn send(&self, _frame: Bytes) -> Result<(), SinkError> {
            panic!("sink blew up");
        }
    }

    #[test]
    fn test_panicking_sink_leaves_topic_usable() {
        let topic = topic(10);
        let mut healthy = topic.subscribe().unwrap();
        let bad = topic.attach(Arc::new(PanickingSink)).unwrap();

        let published = publish(&topic, "one");
        assert_eq!(published.delivery, Delivery { delivered: 1, dropped: 1 });
        assert!(!bad.registration.is_active());

        publish(&topic, "two");
        assert_eq!(texts(&drain(&mut healthy)), vec!["one", "two"]);
        assert_eq!(topic.list(None, None).unwrap().total, 2);
        assert_eq!(topic.subscribe().unwrap().replayed(), 2);
    }

    #[test]
    fn test_poisoned_topic_reports_internal_error() {
        let topic = topic(10);
        publish(&topic, "before");
        topic.poison();

        assert!(matches!(
            topic.publish(&PublishRequest::text("after").with_attributor("#000000")),
            Err(PublishError::Internal(BroadcastError::Poisoned))
        ));
        assert!(matches!(topic.list(None, None), Err(BroadcastError::Poisoned)));
        assert!(matches!(topic.subscribe(), Err(BroadcastError::Poisoned)));
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[test]
    fn test_lagging_subscriber_is_dropped() {
        let topic = Broadcaster::with_config(
            TopicConfig::new("slow").with_subscriber_buffer(2),
            Box::new(Anonymous::default()),
        );
        let mut slow = topic.subscribe().unwrap();
        let mut fast = topic.subscribe().unwrap();

        for n in 0..2 {
            publish(&topic, &format!("m{n}"));
            drain(&mut fast);
        }
        let published = publish(&topic, "overflow");
        assert_eq!(published.delivery.dropped, 1);
        assert!(!slow.is_active());
        assert_eq!(texts(&drain(&mut fast)), vec!["overflow"]);

        // Queued frames are still readable, then the stream ends.
        assert_eq!(texts(&drain(&mut slow)), vec!["m0", "m1"]);
    }

    #[test]
    fn test_drop_unregisters() {
        let topic = topic(10);
        let sub = topic.subscribe().unwrap();
        let id = sub.id();
        assert_eq!(topic.subscriber_count(), 1);

        drop(sub);
        assert_eq!(topic.subscriber_count(), 0);
        assert!(!topic.unsubscribe(id));
    }

    #[test]
    fn test_timestamps_non_decreasing_and_client_advisory() {
        let topic = topic(10);
        let first = topic
            .publish(&PublishRequest::text("a").with_timestamp(1))
            .unwrap();
        assert!(first.message.timestamp > 1);
        assert_eq!(first.message.sent_at, Some(1));

        let second = publish(&topic, "b");
        assert!(second.message.timestamp >= first.message.timestamp);
        assert_ne!(first.message.id, second.message.id);
    }

    #[test]
    fn test_trusted_client_timestamps_are_clamped() {
        let topic = Broadcaster::with_config(
            TopicConfig::new("trusted").with_client_timestamps(true),
            Box::new(Anonymous::default()),
        );
        let a = topic
            .publish(&PublishRequest::text("a").with_timestamp(5_000))
            .unwrap();
        let b = topic
            .publish(&PublishRequest::text("b").with_timestamp(1_000))
            .unwrap();

        assert_eq!(a.message.timestamp, 5_000);
        assert_eq!(b.message.timestamp, 5_000);
        assert_eq!(b.message.sent_at, None);
    }

    #[test]
    fn test_list_since_watermark() {
        let topic = Broadcaster::with_config(
            TopicConfig::new("poll").with_client_timestamps(true),
            Box::new(Anonymous::default()),
        );
        for ts in [100, 200, 300, 400] {
            topic
                .publish(&PublishRequest::text(format!("t{ts}")).with_timestamp(ts))
                .unwrap();
        }

        let snapshot = topic.list(Some(200), None).unwrap();
        let stamps: Vec<u64> = snapshot.messages.iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![300, 400]);
        assert_eq!(snapshot.total, 4);

        let snapshot = topic.list(Some(100), Some(1)).unwrap();
        assert_eq!(snapshot.messages[0].timestamp, 400);
    }

    #[test]
    fn test_named_schema_uses_user_field() {
        let topic = Broadcaster::with_config(TopicConfig::new("named"), Box::new(Named));
        assert!(matches!(
            topic.publish(&PublishRequest::text("hi")),
            Err(PublishError::Invalid(ValidationError::MissingAttributor("user")))
        ));

        let mut request = PublishRequest::text("hi");
        request.user = Some("alice".to_string());
        topic.publish(&request).unwrap();

        let sub = topic.subscribe().unwrap();
        let replay = decode(&sub.backlog()[1]);
        assert_eq!(replay["user"], "alice");
        assert!(replay.get("color").is_none());
    }

    #[test]
    fn test_connection_event_optional() {
        let topic = Broadcaster::with_config(
            TopicConfig::new("quiet").with_connection_event(false),
            Box::new(Anonymous::default()),
        );
        assert!(topic.subscribe().unwrap().backlog().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_ends_streams() {
        let topic = topic(10);
        let mut sub = topic.subscribe().unwrap();
        assert_eq!(topic.shutdown(), 1);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_sees_each_message_once() {
        let topic = Arc::new(Broadcaster::with_config(
            TopicConfig::new("busy")
                .with_capacity(Some(10_000))
                .with_subscriber_buffer(1024),
            Box::new(Anonymous::default()),
        ));

        let publisher = {
            let topic = Arc::clone(&topic);
            tokio::spawn(async move {
                for n in 0..500 {
                    publish(&topic, &format!("{n}"));
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut subs = Vec::new();
        for _ in 0..10 {
            subs.push(topic.subscribe().unwrap());
            tokio::task::yield_now().await;
        }
        publisher.await.unwrap();

        for mut sub in subs {
            let mut seen = texts(&sub.take_backlog());
            seen.extend(texts(&drain(&mut sub)));
            let expected: Vec<String> = (0..500).map(|n| n.to_string()).collect();
            assert_eq!(seen, expected);
        }
    }
}
