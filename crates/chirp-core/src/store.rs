//! Bounded in-memory message log for one topic.

use crate::message::Message;
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of messages returned by [`MessageStore::list`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// An append-only, optionally capacity-bounded, ordered log of messages.
///
/// Insertion order is arrival order. When a capacity is set the oldest
/// entries are dropped so the length never exceeds it. Timestamps are
/// non-decreasing, which lets watermark reads binary-search.
///
/// The store is not synchronized; its owner serializes access.
#[derive(Debug)]
pub struct MessageStore {
    messages: VecDeque<Arc<Message>>,
    capacity: Option<usize>,
}

impl MessageStore {
    /// Create a store that keeps at most `capacity` messages.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(1024)),
            capacity: Some(capacity),
        }
    }

    /// Create a store that never trims.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            messages: VecDeque::new(),
            capacity: None,
        }
    }

    /// Create a store from an optional capacity.
    #[must_use]
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        capacity.map_or_else(Self::unbounded, Self::bounded)
    }

    /// Append a message, dropping the oldest excess entries.
    ///
    /// Returns the number of messages evicted.
    pub fn append(&mut self, message: Arc<Message>) -> usize {
        self.messages.push_back(message);

        let Some(capacity) = self.capacity else {
            return 0;
        };
        let excess = self.messages.len().saturating_sub(capacity);
        self.messages.drain(..excess);
        excess
    }

    /// Snapshot of messages newer than `since`, tail-capped to `limit`.
    ///
    /// `since = None` selects everything; `limit = None` applies
    /// [`DEFAULT_LIST_LIMIT`]. A limit of zero means no cap.
    #[must_use]
    pub fn list(&self, since: Option<u64>, limit: Option<usize>) -> Vec<Arc<Message>> {
        let start = since.map_or(0, |since| {
            self.messages.partition_point(|m| m.timestamp <= since)
        });

        let available = self.messages.len() - start;
        let take = match limit.unwrap_or(DEFAULT_LIST_LIMIT) {
            0 => available,
            limit => limit.min(available),
        };

        self.messages
            .range(self.messages.len() - take..)
            .cloned()
            .collect()
    }

    /// Snapshot of every stored message, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Message>> {
        self.messages.iter().cloned().collect()
    }

    /// Timestamp of the newest message.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<u64> {
        self.messages.back().map(|m| m.timestamp)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
