//! Per-topic message schemas.
//!
//! Topics share one [`Broadcaster`](crate::Broadcaster) implementation and
//! differ only in how the attributor is named on the wire and validated.

use crate::message::{clamp_chars, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum attributor length, in characters.
pub const MAX_ATTRIBUTOR_LENGTH: usize = 32;

/// Palette for anonymous senders that did not pick a color.
pub const ANON_COLORS: [&str; 15] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E9", "#F8C471", "#82E0AA", "#F1948A", "#85C1E9", "#D2B4DE",
];

/// Attributor rules for one topic.
pub trait Schema: Send + Sync + fmt::Debug {
    /// Name of the attributor field in JSON.
    fn attributor_field(&self) -> &'static str;

    /// Turn the client-supplied attributor into the stored one.
    ///
    /// `seq` is the sequence number reserved for the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic requires an attributor and none was given.
    fn resolve_attributor(&self, supplied: Option<&str>, seq: u64)
        -> Result<String, ValidationError>;
}

/// Anonymous chat: senders are told apart by a display color.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous {
    /// Refuse messages without a color instead of assigning one.
    pub required: bool,
}

impl Schema for Anonymous {
    fn attributor_field(&self) -> &'static str {
        "color"
    }

    fn resolve_attributor(
        &self,
        supplied: Option<&str>,
        seq: u64,
    ) -> Result<String, ValidationError> {
        match supplied.map(str::trim).filter(|c| !c.is_empty()) {
            Some(color) => Ok(clamp_chars(color, MAX_ATTRIBUTOR_LENGTH).to_string()),
            None if self.required => Err(ValidationError::MissingAttributor("color")),
            None => Ok(ANON_COLORS[(seq % ANON_COLORS.len() as u64) as usize].to_string()),
        }
    }
}

/// Named chat: every message carries a username.
#[derive(Debug, Clone, Copy, Default)]
pub struct Named;

impl Schema for Named {
    fn attributor_field(&self) -> &'static str {
        "user"
    }

    fn resolve_attributor(
        &self,
        supplied: Option<&str>,
        _seq: u64,
    ) -> Result<String, ValidationError> {
        supplied
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| clamp_chars(u, MAX_ATTRIBUTOR_LENGTH).to_string())
            .ok_or(ValidationError::MissingAttributor("user"))
    }
}

/// Schema selector used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    #[default]
    Anonymous,
    Named,
}

impl SchemaKind {
    /// Build the schema. `require_attributor` only affects anonymous topics;
    /// named topics always require a username.
    #[must_use]
    pub fn build(self, require_attributor: bool) -> Box<dyn Schema> {
        match self {
            SchemaKind::Anonymous => Box::new(Anonymous {
                required: require_attributor,
            }),
            SchemaKind::Named => Box::new(Named),
        }
    }
}
