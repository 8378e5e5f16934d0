//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (CHIRP_HOST, CHIRP_PORT, CHIRP_CONFIG)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use chirp_core::{SchemaKind, TopicConfig, MAX_TEXT_LENGTH_LIMIT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Name of the counter topic's route segment.
pub const LIKES_TOPIC: &str = "likes";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Message and subscriber limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Keep-alive configuration for push streams.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Chat topics, each mounted at `/api/<name>`.
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicSettings>,

    /// Counter topic.
    #[serde(default)]
    pub likes: LikesConfig,
}

/// Limits shared by every topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message length in characters; longer text is truncated.
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Frames queued per subscriber before it is dropped as lagging.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Keep-alive comment interval in milliseconds. Zero disables it.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// One chat topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSettings {
    /// Route segment and log name.
    pub name: String,

    /// Attributor schema.
    #[serde(default)]
    pub schema: SchemaKind,

    /// Messages kept for replay and polling.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Trim the store to `capacity`. Low-traffic topics may opt out.
    #[serde(default = "default_true")]
    pub trim: bool,

    /// Refuse anonymous messages that carry no color.
    #[serde(default)]
    pub require_attributor: bool,

    /// Stamp messages with the client's timestamp instead of server time.
    #[serde(default)]
    pub trust_client_timestamps: bool,
}

/// Counter topic configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String {
    std::env::var("CHIRP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("CHIRP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000)
}

fn default_true() -> bool {
    true
}

fn default_max_text_length() -> usize {
    chirp_core::MAX_TEXT_LENGTH
}

fn default_subscriber_buffer() -> usize {
    chirp_core::registry::DEFAULT_SUBSCRIBER_BUFFER
}

fn default_heartbeat_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_capacity() -> usize {
    chirp_core::broadcaster::DEFAULT_CAPACITY
}

fn default_topics() -> Vec<TopicSettings> {
    vec![
        TopicSettings {
            require_attributor: true,
            ..TopicSettings::new("group-chat", SchemaKind::Anonymous)
        },
        TopicSettings {
            capacity: 100,
            ..TopicSettings::new("chat", SchemaKind::Anonymous)
        },
        TopicSettings::new("named-chat", SchemaKind::Named),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            topics: default_topics(),
            likes: LikesConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text_length: default_max_text_length(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for LikesConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl TopicSettings {
    /// Create settings with default limits.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: SchemaKind) -> Self {
        Self {
            name: name.into(),
            schema,
            capacity: default_capacity(),
            trim: true,
            require_attributor: false,
            trust_client_timestamps: false,
        }
    }

    /// Build the core topic configuration.
    #[must_use]
    pub fn topic_config(&self, limits: &LimitsConfig) -> TopicConfig {
        TopicConfig::new(self.name.clone())
            .with_capacity(self.trim.then_some(self.capacity))
            .with_max_text_length(limits.max_text_length)
            .with_subscriber_buffer(limits.subscriber_buffer)
            .with_client_timestamps(self.trust_client_timestamps)
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `CHIRP_CONFIG` names an explicit file; otherwise the default paths
    /// are tried in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the resulting configuration is invalid.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("CHIRP_CONFIG") {
            let expanded = shellexpand::tilde(&path);
            return Self::from_file(expanded.as_ref());
        }

        // Try to load from default paths
        let config_paths = [
            "chirp.toml",
            "/etc/chirp/chirp.toml",
            "~/.config/chirp/chirp.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Check topic names and limits.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.limits.max_text_length == 0 {
            bail!("limits.max_text_length must be positive");
        }
        if self.limits.max_text_length > MAX_TEXT_LENGTH_LIMIT {
            bail!(
                "limits.max_text_length {} exceeds the limit of {MAX_TEXT_LENGTH_LIMIT}",
                self.limits.max_text_length
            );
        }

        let mut seen = HashSet::new();
        for topic in &self.topics {
            let name = topic.name.as_str();
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                bail!("Invalid topic name: {name:?}");
            }
            if self.likes.enabled && name == LIKES_TOPIC {
                bail!("Topic name {LIKES_TOPIC:?} is reserved for the counter");
            }
            if !seen.insert(name) {
                bail!("Duplicate topic name: {name:?}");
            }
            if topic.trim && topic.capacity == 0 {
                bail!("Topic {name:?} has zero capacity");
            }
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
