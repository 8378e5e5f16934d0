//! Shared counter topic.
//!
//! A counter has no history: every subscriber gets the current value on
//! connect, then every new value as it changes.

use crate::broadcaster::BroadcastError;
use crate::registry::{
    ChannelSink, Registration, SubscriberRegistry, DEFAULT_SUBSCRIBER_BUFFER,
};
use crate::subscription::Subscription;
use chirp_protocol::{codec, CountEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// A counter whose value is pushed to every subscriber.
pub struct Counter {
    count: Mutex<u64>,
    registry: Arc<SubscriberRegistry>,
    subscriber_buffer: usize,
}

impl Counter {
    /// Create a counter starting at zero.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_buffer(name, DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a counter with a custom per-subscriber queue length.
    #[must_use]
    pub fn with_buffer(name: impl Into<String>, subscriber_buffer: usize) -> Self {
        Self {
            count: Mutex::new(0),
            registry: Arc::new(SubscriberRegistry::new(name)),
            subscriber_buffer,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, u64>, BroadcastError> {
        self.count.lock().map_err(|_| BroadcastError::Poisoned)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.registry.topic()
    }

    /// Current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter lock is poisoned.
    pub fn get(&self) -> Result<u64, BroadcastError> {
        Ok(*self.lock()?)
    }

    /// Add one and push the new value to every subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter lock is poisoned or the event cannot
    /// be encoded.
    pub fn increment(&self) -> Result<u64, BroadcastError> {
        let mut count = self.lock()?;
        let next = *count + 1;
        let frame = codec::encode(&CountEvent { count: next })?;
        *count = next;

        let delivery = self.registry.broadcast(&frame);
        trace!(
            counter = %self.name(),
            count = next,
            recipients = delivery.delivered,
            "Counter incremented"
        );
        Ok(next)
    }

    /// Subscribe to value changes. The backlog holds the current value.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter lock is poisoned or the event cannot
    /// be encoded.
    pub fn subscribe(&self) -> Result<Subscription, BroadcastError> {
        let (sink, receiver) = ChannelSink::new(self.subscriber_buffer);

        let count = self.lock()?;
        let frame = codec::encode(&CountEvent { count: *count })?;
        let registration = Registration::new(Arc::clone(&self.registry), Arc::new(sink));
        drop(count);

        debug!(counter = %self.name(), subscriber = registration.id(), "Subscribed");
        Ok(Subscription::new(registration, vec![frame], 0, receiver))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    /// Disconnect every subscriber.
    pub fn shutdown(&self) -> usize {
        self.registry.clear()
    }
}
