//! Tick-driven peer sessions with verb-based messaging.
//!
//! Provides:
//! - `Session` - Server or client peer with `start`/`stop`/`send`/`trigger`/`on`
//! - `Peer` - Session state handed to listeners so they can reply or stop
//! - `Ticker` - Fallback thread that pumps a session at a fixed rate

pub mod listeners;
pub mod peer;
pub mod session;
pub mod ticker;

mod diagnostics;
mod intercept;

pub use listeners::Callback;
pub use peer::{Peer, SessionError, SessionState};
pub use session::Session;
pub use ticker::Ticker;

pub use peerlink_core::{ClientId, ClientRecord, Event, EventLabel, Message, Mode, SessionParams};

#[cfg(test)]
mod tests;
