//! Event types for the Chirp protocol.
//!
//! Every event is a JSON object carried in one `data:` frame of a
//! Server-Sent Events stream.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Text of the connection confirmation event.
pub const CONNECTED_TEXT: &str = "Connected to chat";

/// A chat message as stored and delivered.
///
/// Messages are immutable once appended to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic-unique message identifier.
    pub id: String,
    /// Trimmed, length-clamped message text. Never empty.
    pub text: String,
    /// Server-assigned epoch milliseconds, non-decreasing within a topic.
    pub timestamp: u64,
    /// Display color or username, depending on the topic.
    pub attributor: String,
    /// Client-supplied timestamp kept as advisory metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<u64>,
}

/// A message rendered with its topic's attributor field name.
///
/// Anonymous topics call the attributor `color`, named topics call it
/// `user`; the stored [`Message`] does not care.
#[derive(Debug, Clone, Copy)]
pub struct TopicMessage<'a> {
    pub message: &'a Message,
    pub attributor_field: &'a str,
}

impl<'a> TopicMessage<'a> {
    /// Create a new topic view of a message.
    #[must_use]
    pub fn new(message: &'a Message, attributor_field: &'a str) -> Self {
        Self {
            message,
            attributor_field,
        }
    }
}

impl Serialize for TopicMessage<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.message.sent_at.is_some() { 5 } else { 4 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry("id", &self.message.id)?;
        map.serialize_entry("text", &self.message.text)?;
        map.serialize_entry("timestamp", &self.message.timestamp)?;
        map.serialize_entry(self.attributor_field, &self.message.attributor)?;
        if let Some(sent_at) = self.message.sent_at {
            map.serialize_entry("sent_at", &sent_at)?;
        }
        map.end()
    }
}

/// Liveness marker sent to a new subscriber before its replay.
///
/// Consumers can tell it apart from real content by its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "connection")]
pub struct ConnectionEvent {
    pub message: String,
    pub timestamp: u64,
}

impl ConnectionEvent {
    /// Create a connection event stamped at `timestamp`.
    #[must_use]
    pub fn new(timestamp: u64) -> Self {
        Self {
            message: CONNECTED_TEXT.to_string(),
            timestamp,
        }
    }
}

/// Current value of a counter topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountEvent {
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: "msg_0_1700000000000".to_string(),
            text: "hello".to_string(),
            timestamp: 1_700_000_000_000,
            attributor: "#FF6B6B".to_string(),
            sent_at: None,
        }
    }

    #[test]
    fn test_topic_message_uses_field_name() {
        let message = sample();

        let json = serde_json::to_value(TopicMessage::new(&message, "color")).unwrap();
        assert_eq!(json["color"], "#FF6B6B");
        assert!(json.get("attributor").is_none());
        assert!(json.get("sent_at").is_none());

        let json = serde_json::to_value(TopicMessage::new(&message, "user")).unwrap();
        assert_eq!(json["user"], "#FF6B6B");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn test_topic_message_includes_advisory_timestamp() {
        let mut message = sample();
        message.sent_at = Some(42);

        let json = serde_json::to_value(TopicMessage::new(&message, "color")).unwrap();
        assert_eq!(json["sent_at"], 42);
    }

    #[test]
    fn test_connection_event_tag() {
        let json = serde_json::to_value(ConnectionEvent::new(7)).unwrap();
        assert_eq!(json["type"], "connection");
        assert_eq!(json["message"], CONNECTED_TEXT);
        assert_eq!(json["timestamp"], 7);
    }
}
