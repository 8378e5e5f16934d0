//! Registry of live output sinks for one topic.
//!
//! A sink is anything that can accept a pre-encoded event frame without
//! blocking. Sinks that refuse a frame are removed on the spot.

use bytes::Bytes;
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-subscriber queue length.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identity of a registered sink.
pub type SubscriberId = u64;

/// Reasons a sink refuses a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    /// The consumer went away.
    #[error("Sink closed")]
    Closed,

    /// The consumer is not keeping up and its queue is full.
    #[error("Sink queue full")]
    Lagging,

    /// The sink panicked while accepting the frame.
    #[error("Sink panicked")]
    Panicked,
}

/// An output channel that accepts encoded event frames.
///
/// `send` must not block: a slow consumer has to fail fast so it cannot
/// stall delivery to everyone else.
pub trait Sink: Send + Sync {
    /// Hand one frame to the consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer is gone or cannot take more frames.
    fn send(&self, frame: Bytes) -> Result<(), SinkError>;
}

/// A sink backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    /// Create a sink and the receiver its frames arrive on.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }
}

impl Sink for ChannelSink {
    fn send(&self, frame: Bytes) -> Result<(), SinkError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Lagging,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sinks that accepted the frame.
    pub delivered: usize,
    /// Sinks that refused it and were removed.
    pub dropped: usize,
}

/// The set of currently connected sinks.
pub struct SubscriberRegistry {
    /// Topic name, for logging.
    topic: String,
    sinks: DashMap<SubscriberId, Arc<dyn Sink>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            sinks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a sink and return its handle.
    pub fn register(&self, sink: Arc<dyn Sink>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sinks.insert(id, sink);
        debug!(
            topic = %self.topic,
            subscriber = id,
            subscribers = self.sinks.len(),
            "Subscriber registered"
        );
        id
    }

    /// Remove a sink.
    ///
    /// Removing an unknown or already removed handle is a no-op. Returns
    /// `true` if the sink was present.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.sinks.remove(&id).is_some();
        if removed {
            debug!(
                topic = %self.topic,
                subscriber = id,
                subscribers = self.sinks.len(),
                "Subscriber unregistered"
            );
        }
        removed
    }

    /// Apply `f` to every sink registered at call time.
    ///
    /// Iterates over a snapshot, so `f` may unregister sinks (including the
    /// one it is looking at) without disturbing the walk.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(SubscriberId, &Arc<dyn Sink>),
    {
        let snapshot: Vec<(SubscriberId, Arc<dyn Sink>)> = self
            .sinks
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();

        for (id, sink) in &snapshot {
            f(*id, sink);
        }
    }

    /// Push `frame` to every sink, removing the ones that refuse it.
    ///
    /// A sink that panics is treated like one that failed, so callers holding
    /// a lock across the fan-out never see it poisoned by sink code.
    pub fn broadcast(&self, frame: &Bytes) -> Delivery {
        let mut delivery = Delivery::default();

        self.for_each(|id, sink| match send_guarded(sink.as_ref(), frame) {
            Ok(()) => delivery.delivered += 1,
            Err(e) => {
                warn!(topic = %self.topic, subscriber = id, error = %e, "Dropping subscriber");
                self.unregister(id);
                delivery.dropped += 1;
            }
        });

        delivery
    }

    /// Remove every sink. Their consumers observe end-of-stream.
    ///
    /// Returns the number of sinks removed.
    pub fn clear(&self) -> usize {
        let count = self.sinks.len();
        self.sinks.clear();
        debug!(topic = %self.topic, removed = count, "Registry cleared");
        count
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.sinks.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn send_guarded(sink: &dyn Sink, frame: &Bytes) -> Result<(), SinkError> {
    panic::catch_unwind(AssertUnwindSafe(|| sink.send(frame.clone())))
        .unwrap_or(Err(SinkError::Panicked))
}

/// Keeps a sink registered for as long as it lives.
///
/// Dropping the guard unregisters the sink, so a transport only has to drop
/// the subscription when its peer goes away.
pub struct Registration {
    registry: Arc<SubscriberRegistry>,
    id: SubscriberId,
}

impl Registration {
    /// Register `sink` and tie its membership to the returned guard.
    #[must_use]
    pub fn new(registry: Arc<SubscriberRegistry>, sink: Arc<dyn Sink>) -> Self {
        let id = registry.register(sink);
        Self { registry, id }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the sink is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry.contains(self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("topic", &self.registry.topic())
            .field("id", &self.id)
            .finish()
    }
}
