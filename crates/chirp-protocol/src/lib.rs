//! # chirp-protocol
//!
//! Wire protocol definitions for the Chirp message relay.
//!
//! Chirp speaks plain HTTP: publishers `POST` JSON bodies, push consumers
//! hold a Server-Sent Events stream, and polling consumers `GET` snapshots.
//! This crate owns every shape that crosses that boundary.
//!
//! ## Event Types
//!
//! - `Message` - A chat message as stored and delivered
//! - `ConnectionEvent` - Liveness marker sent before the replay
//! - `CountEvent` - Counter topic value
//!
//! ## Example
//!
//! ```rust
//! use chirp_protocol::{codec, ConnectionEvent};
//!
//! let event = ConnectionEvent::new(1_700_000_000_000);
//! let frame = codec::encode(&event).unwrap();
//! assert!(frame.starts_with(b"data: "));
//!
//! let payload = codec::decode(&frame).unwrap();
//! assert_eq!(payload["type"], "connection");
//! ```

pub mod api;
pub mod codec;
pub mod events;

pub use api::{CountResponse, ErrorResponse, PollResponse, PublishRequest, PublishResponse};
pub use codec::{decode, encode, ProtocolError};
pub use events::{ConnectionEvent, CountEvent, Message, TopicMessage};
