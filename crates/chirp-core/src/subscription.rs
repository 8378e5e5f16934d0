//! Subscriber-side handle for a push stream.

use crate::registry::{Registration, SubscriberId};
use bytes::Bytes;
use tokio::sync::mpsc;

/// A live subscription to a topic.
///
/// Frames come in two phases: the backlog captured at subscribe time
/// (control event first, then the replay in stored order), then live frames
/// in publish order. Dropping the subscription unregisters it.
#[derive(Debug)]
pub struct Subscription {
    registration: Registration,
    backlog: Vec<Bytes>,
    replayed: usize,
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscription {
    pub(crate) fn new(
        registration: Registration,
        backlog: Vec<Bytes>,
        replayed: usize,
        receiver: mpsc::Receiver<Bytes>,
    ) -> Self {
        Self {
            registration,
            backlog,
            replayed,
            receiver,
        }
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.registration.id()
    }

    /// Number of stored messages in the backlog.
    #[must_use]
    pub fn replayed(&self) -> usize {
        self.replayed
    }

    /// Frames captured at subscribe time.
    #[must_use]
    pub fn backlog(&self) -> &[Bytes] {
        &self.backlog
    }

    /// Take the backlog, leaving it empty.
    pub fn take_backlog(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.backlog)
    }

    /// Wait for the next live frame.
    ///
    /// Returns `None` once the subscriber was removed (lagging, or topic
    /// shut down) and every queued frame has been read.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Take the next live frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }

    /// Whether the topic still delivers to this subscription.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registration.is_active()
    }
}
