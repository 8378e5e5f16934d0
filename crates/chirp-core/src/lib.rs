//! # chirp-core
//!
//! Core types and the broadcast engine for the Chirp message relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **MessageStore** - Bounded, ordered message log for one topic
//! - **SubscriberRegistry** - Live output sinks for one topic
//! - **Broadcaster** - Publish, fan-out, replay and polling for one topic
//! - **Counter** - A history-less value pushed to subscribers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │  Publisher  │────▶│ Broadcaster  │────▶│ MessageStore │
//! └─────────────┘     └──────────────┘     └──────────────┘
//!                            │
//!                            ▼
//!                   ┌──────────────────┐     ┌──────────────┐
//!                   │SubscriberRegistry│────▶│ Subscription │
//!                   └──────────────────┘     └──────────────┘
//! ```
//!
//! Topics are independent: each [`Broadcaster`] owns its own store and
//! registry, and nothing outside it mutates either.

pub mod broadcaster;
pub mod counter;
pub mod message;
pub mod registry;
pub mod schema;
pub mod store;
pub mod subscription;

pub use broadcaster::{
    Attached, BroadcastError, Broadcaster, PublishError, Published, Snapshot, TopicConfig,
    TopicStats,
};
pub use counter::Counter;
pub use message::{Message, ValidationError, MAX_TEXT_LENGTH, MAX_TEXT_LENGTH_LIMIT};
pub use registry::{
    ChannelSink, Delivery, Registration, Sink, SinkError, SubscriberId, SubscriberRegistry,
};
pub use schema::{Anonymous, Named, Schema, SchemaKind};
pub use store::MessageStore;
pub use subscription::Subscription;
