//! Codec for encoding and decoding Chirp events.
//!
//! Events travel as Server-Sent Events frames: a single `data:` line holding
//! compact JSON, terminated by a blank line. Compact JSON never contains a
//! raw newline, so one line per frame is always enough.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Maximum encoded event size (64 KiB).
pub const MAX_EVENT_SIZE: usize = 64 * 1024;

/// Prefix of a data line.
pub const DATA_PREFIX: &[u8] = b"data: ";

/// Blank line terminating a frame.
pub const FRAME_TERMINATOR: &[u8] = b"\n\n";

const KEEP_ALIVE: &[u8] = b": keep-alive\n\n";

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Event exceeds maximum size.
    #[error("Event size {0} exceeds maximum {MAX_EVENT_SIZE}")]
    EventTooLarge(usize),

    /// No frame terminator in the data yet.
    #[error("Incomplete event frame")]
    Incomplete,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode an event to a frame.
///
/// The encoded format is `data: <json>\n\n`.
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode<T: Serialize + ?Sized>(event: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(event, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode an event into an existing buffer.
///
/// # Errors
///
/// Returns an error if the event is too large or serialization fails.
pub fn encode_into<T: Serialize + ?Sized>(
    event: &T,
    buf: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(event)?;

    let size = DATA_PREFIX.len() + payload.len() + FRAME_TERMINATOR.len();
    if size > MAX_EVENT_SIZE {
        return Err(ProtocolError::EventTooLarge(size));
    }

    buf.reserve(size);
    buf.put_slice(DATA_PREFIX);
    buf.put_slice(&payload);
    buf.put_slice(FRAME_TERMINATOR);

    Ok(())
}

/// A comment frame that keeps idle connections open.
///
/// Consumers ignore comment frames.
#[must_use]
pub fn keep_alive() -> Bytes {
    Bytes::from_static(KEEP_ALIVE)
}

/// Decode the first data-carrying frame in `data`.
///
/// Comment-only frames before it are skipped.
///
/// # Errors
///
/// Returns `Incomplete` if no complete data frame is present, or an error if
/// the frame is too large or its payload is not JSON.
pub fn decode(data: &[u8]) -> Result<Value, ProtocolError> {
    let mut buf = BytesMut::from(data);
    decode_from(&mut buf)?.ok_or(ProtocolError::Incomplete)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete data frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Value>, ProtocolError> {
    loop {
        let Some(end) = find_terminator(buf) else {
            if buf.len() > MAX_EVENT_SIZE {
                return Err(ProtocolError::EventTooLarge(buf.len()));
            }
            return Ok(None);
        };

        let frame = buf.split_to(end + FRAME_TERMINATOR.len());
        if let Some(payload) = frame_data(&frame[..end])? {
            return Ok(Some(serde_json::from_str(&payload)?));
        }
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(FRAME_TERMINATOR.len())
        .position(|w| w == FRAME_TERMINATOR)
}

/// Join the `data:` lines of one frame. Returns `None` for comment frames.
fn frame_data(frame: &[u8]) -> Result<Option<String>, ProtocolError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| ProtocolError::Invalid(format!("frame is not UTF-8: {e}")))?;

    let mut lines = Vec::new();
    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        match line.strip_prefix("data:") {
            Some(value) => lines.push(value.strip_prefix(' ').unwrap_or(value)),
            None => return Err(ProtocolError::Invalid(format!("unexpected line: {line}"))),
        }
    }

    if lines.is_empty() {
        Ok(None)
    } else {
        Ok(Some(lines.join("\n")))
    }
}
