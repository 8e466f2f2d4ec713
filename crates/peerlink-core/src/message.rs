//! Verb + content messages and the reserved core verbs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix shared by every reserved verb.
pub const CORE_PREFIX: &str = "core.";

/// A message exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Purpose of the message; absent for raw `send` payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,
    /// Schema-free application data.
    #[serde(default)]
    pub content: Value,
}

impl Message {
    /// Create a message tagged with a verb.
    #[must_use]
    pub fn new(verb: impl Into<String>, content: Value) -> Self {
        Self {
            verb: Some(verb.into()),
            content,
        }
    }

    /// Create a message without a verb.
    #[must_use]
    pub const fn untagged(content: Value) -> Self {
        Self {
            verb: None,
            content,
        }
    }

    /// Create a session bookkeeping message.
    #[must_use]
    pub fn core(verb: CoreVerb, content: Value) -> Self {
        Self::new(verb.as_str(), content)
    }

    /// Whether the verb falls in the reserved namespace.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        self.verb.as_deref().is_some_and(CoreVerb::is_reserved)
    }
}

/// Verbs the session intercepts before application listeners run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreVerb {
    /// A client announces its persistent identity.
    SyncClientData,
    /// The server rejected a connection because it is at capacity.
    ServerFull,
}

impl CoreVerb {
    /// All reserved verbs.
    pub const ALL: [Self; 2] = [Self::SyncClientData, Self::ServerFull];

    /// Wire name of the verb.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SyncClientData => "core.sync.update_client_data",
            Self::ServerFull => "core.errors.server_full",
        }
    }

    /// Look up a reserved verb by wire name.
    #[must_use]
    pub fn parse(verb: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|core| core.as_str() == verb)
    }

    /// Whether application code must not use this verb.
    #[must_use]
    pub fn is_reserved(verb: &str) -> bool {
        verb.starts_with(CORE_PREFIX)
    }
}
