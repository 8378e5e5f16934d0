//! Message construction for Chirp.
//!
//! Raw publish input is validated and normalized here before it reaches a
//! store. Stored messages are the protocol's [`Message`] type.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use chirp_protocol::Message;

/// Default maximum message length, in characters.
pub const MAX_TEXT_LENGTH: usize = 500;

/// Bytes of a frame reserved for everything except the text.
const FRAME_HEADROOM: usize = 1024;

/// Largest configurable message length.
///
/// A character escapes to at most six bytes of JSON (`\u001f`), so text of
/// this length always fits in one event frame.
pub const MAX_TEXT_LENGTH_LIMIT: usize =
    (chirp_protocol::codec::MAX_EVENT_SIZE - FRAME_HEADROOM) / 6;

/// Reasons a publish is refused before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Text is missing, empty, or whitespace-only.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// The topic requires an attributor and none was supplied.
    #[error("Message is missing its {0}")]
    MissingAttributor(&'static str),
}

/// Current wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Trim `raw` and clamp it to `max_chars` characters.
///
/// Long text is truncated, never rejected.
///
/// # Errors
///
/// Returns [`ValidationError::EmptyMessage`] if nothing is left after trimming.
pub fn sanitize_text(raw: Option<&str>, max_chars: usize) -> Result<String, ValidationError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }

    Ok(clamp_chars(trimmed, max_chars).to_string())
}

/// The longest prefix of `s` holding at most `max_chars` characters.
#[must_use]
pub fn clamp_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Per-topic message id generator.
///
/// Ids combine a monotonically increasing sequence with the wall clock,
/// which keeps them unique for the lifetime of the topic.
#[derive(Debug, Default)]
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next sequence number.
    pub fn next_seq(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Format an id from a reserved sequence number.
    #[must_use]
    pub fn format(seq: u64, timestamp: u64) -> String {
        format!("msg_{seq}_{timestamp}")
    }
}
