//! Events delivered from endpoints to the host tick.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::message::{CoreVerb, Message};

/// Session identifier.
pub type SessionId = Uuid;

/// Connection-local identifier the server assigns to each remote peer.
pub type ClientId = Uuid;

/// What kind of occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLabel {
    /// A peer connected (server: a client arrived; client: link to the server is up).
    Connected,
    /// A remote client went away (server side).
    Disconnected,
    /// A message arrived from a peer.
    MessageReceived,
    /// A message was written to a peer.
    MessageSent,
    /// A message could not be written.
    MessageSentFailed,
    /// Transport-level failure (accept, policy responder bind, ...).
    SecurityError,
    /// The remote server rejected us because it is at capacity.
    ServerFull,
    /// The endpoint bound or connected.
    InitSuccess,
    /// The endpoint could not bind or connect.
    InitFailure,
    /// The endpoint's socket closed.
    Closed,
}

impl EventLabel {
    /// Whether events with this label carry a verb.
    #[must_use]
    pub const fn is_message(self) -> bool {
        matches!(
            self,
            Self::MessageReceived | Self::MessageSent | Self::MessageSentFailed
        )
    }
}

/// One occurrence, immutable once built.
///
/// Consumers receive events by reference during dispatch and clone what
/// they want to keep; nothing a consumer does reaches the producer.
///
/// For message events the payload is the message content, except for
/// `MessageSentFailed` whose payload is `{"content": .., "error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    label: EventLabel,
    verb: Option<String>,
    payload: Value,
    session: Option<SessionId>,
    client: Option<ClientId>,
    #[serde(skip)]
    epoch: u64,
}

impl Event {
    /// Create a session-level event with no verb.
    #[must_use]
    pub const fn new(label: EventLabel, payload: Value) -> Self {
        Self {
            label,
            verb: None,
            payload,
            session: None,
            client: None,
            epoch: 0,
        }
    }

    /// Create a message-family event from a wire message.
    #[must_use]
    pub fn message(label: EventLabel, message: Message) -> Self {
        Self {
            verb: message.verb,
            ..Self::new(label, message.content)
        }
    }

    /// Attach the originating remote client.
    #[must_use]
    pub fn with_client(mut self, client: impl Into<Option<ClientId>>) -> Self {
        self.client = client.into();
        self
    }

    /// Stamp the owning session and endpoint epoch.
    #[must_use]
    pub fn stamped(mut self, session: SessionId, epoch: u64) -> Self {
        self.session = Some(session);
        self.epoch = epoch;
        self
    }

    #[must_use]
    pub const fn label(&self) -> EventLabel {
        self.label
    }

    #[must_use]
    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Session this event was delivered to, once queued.
    #[must_use]
    pub const fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Remote client this event originated from (server side only).
    ///
    /// Only meaningful during the dispatch call that delivered the event;
    /// the record may be gone afterwards.
    #[must_use]
    pub const fn client(&self) -> Option<ClientId> {
        self.client
    }

    /// Endpoint generation that produced this event.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The reserved verb carried by this event, if any.
    #[must_use]
    pub fn core_verb(&self) -> Option<CoreVerb> {
        self.verb().and_then(CoreVerb::parse)
    }
}
