//! Core abstractions for tick-driven peer sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Event` / `EventLabel` - Immutable notifications flowing to the host tick
//! - `EventQueue` / `EventSink` - Thread-safe bridge between I/O and the tick
//! - `Message` / `CoreVerb` - Verb + content messages and the reserved verbs
//! - `ClientRegistry` - Server-side bookkeeping of connected peers
//! - `SessionParams` - Connection configuration
//! - Endpoint and connector traits

pub mod client;
pub mod config;
pub mod event;
pub mod message;
pub mod queue;
pub mod traits;

pub use client::{ClientRecord, ClientRegistry};
pub use config::{ConfigError, DEFAULT_POLICY_PORT, Mode, SessionParams};
pub use event::{ClientId, Event, EventLabel, SessionId};
pub use message::{CORE_PREFIX, CoreVerb, Message};
pub use queue::{EventQueue, EventSink};
pub use traits::{Connector, NetworkEndpoint, TransportError};
