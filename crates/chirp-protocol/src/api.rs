//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::events::TopicMessage;

/// Body of a publish request.
///
/// Anonymous clients send `color`, named clients send `user`; generic
/// clients may use `attributor`. The first non-blank one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl PublishRequest {
    /// Create a request carrying only text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Set the generic attributor.
    #[must_use]
    pub fn with_attributor(mut self, attributor: impl Into<String>) -> Self {
        self.attributor = Some(attributor.into());
        self
    }

    /// Set the client timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The attributor supplied by the client, if any.
    #[must_use]
    pub fn supplied_attributor(&self) -> Option<&str> {
        [&self.attributor, &self.color, &self.user]
            .into_iter()
            .filter_map(|a| a.as_deref())
            .map(str::trim)
            .find(|a| !a.is_empty())
    }
}

/// Successful publish response.
#[derive(Debug, Serialize)]
pub struct PublishResponse<'a> {
    pub success: bool,
    pub message: TopicMessage<'a>,
    /// Store length after the append.
    pub total: usize,
}

/// Poll response.
///
/// On failure the server still answers `200` with an empty list and the
/// `error` field set, so polling consumers never hard-fail.
#[derive(Debug, Serialize)]
pub struct PollResponse<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub messages: Vec<TopicMessage<'a>>,
    /// Server time of the snapshot, usable as the next `since` watermark.
    pub timestamp: u64,
    pub total: usize,
}

impl PollResponse<'_> {
    /// The soft-failure shape.
    #[must_use]
    pub fn failed(error: impl Into<String>, timestamp: u64) -> Self {
        Self {
            error: Some(error.into()),
            messages: Vec::new(),
            timestamp,
            total: 0,
        }
    }
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Counter topic response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: u64,
}
