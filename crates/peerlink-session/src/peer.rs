//! Consumer-side session state: lifecycle, outgoing messages, client records.

use std::sync::Arc;

use peerlink_core::{
    ClientId, ClientRecord, ClientRegistry, Connector, CoreVerb, Event, EventLabel, EventQueue,
    EventSink, Message, Mode, NetworkEndpoint, SessionId, SessionParams,
};
use serde_json::{Value, json};
use uuid::Uuid;

/// Usage error reported synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Verb {0:?} is reserved for session bookkeeping")]
    ReservedVerb(String),
    #[error("Verb must not be empty")]
    EmptyVerb,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never started.
    Uninitialized,
    /// An endpoint is live.
    Running,
    /// Stopped; may be started again.
    Stopped,
}

/// Everything about a session except its listeners.
///
/// Listeners receive `&mut Peer`, so they can send, reply, disconnect
/// clients or stop the session from inside a dispatch.
pub struct Peer {
    uuid: SessionId,
    mode: Mode,
    params: SessionParams,
    queue: Arc<EventQueue>,
    connector: Box<dyn Connector>,
    endpoint: Option<Box<dyn NetworkEndpoint>>,
    clients: ClientRegistry,
    state: SessionState,
    epoch: u64,
}

impl Peer {
    pub(crate) fn new(mode: Mode, params: SessionParams, connector: Box<dyn Connector>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            mode,
            params,
            queue: Arc::new(EventQueue::new()),
            connector,
            endpoint: None,
            clients: ClientRegistry::new(),
            state: SessionState::Uninitialized,
            epoch: 0,
        }
    }

    #[must_use]
    pub const fn uuid(&self) -> SessionId {
        self.uuid
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn params(&self) -> &SessionParams {
        &self.params
    }

    /// Connected clients in connection order (server mode; empty otherwise).
    #[must_use]
    pub fn clients(&self) -> &[ClientRecord] {
        self.clients.records()
    }

    #[must_use]
    pub fn client(&self, id: ClientId) -> Option<&ClientRecord> {
        self.clients.get(id)
    }

    /// Id of the live endpoint, if any.
    #[must_use]
    pub fn endpoint_identity(&self) -> Option<Uuid> {
        self.endpoint.as_ref().map(|endpoint| endpoint.identity())
    }

    /// Identity a client announces to the server.
    #[must_use]
    pub fn identity(&self) -> String {
        self.params
            .identity
            .clone()
            .unwrap_or_else(|| self.uuid.to_string())
    }

    pub(crate) fn queue(&self) -> Arc<EventQueue> {
        Arc::clone(&self.queue)
    }

    /// Tear down any live endpoint, then build a fresh one for `mode`.
    ///
    /// Bind/connect outcomes arrive later as events.
    pub fn start(&mut self) {
        self.stop();

        if let Err(e) = self.params.validate() {
            tracing::error!(session = %self.uuid, "Cannot start: {e}");
            self.trigger_event(EventLabel::InitFailure, json!({ "error": e.to_string() }));
            return;
        }

        let sink = EventSink::new(self.queue(), self.uuid, self.epoch);
        match self.connector.open(self.mode, &self.params, sink) {
            Ok(endpoint) => {
                tracing::info!(
                    session = %self.uuid,
                    mode = ?self.mode,
                    address = %self.params.address(),
                    epoch = self.epoch,
                    "Session started"
                );
                self.endpoint = Some(endpoint);
                self.state = SessionState::Running;
            }
            Err(e) => {
                tracing::error!(session = %self.uuid, "Failed to open endpoint: {e}");
                self.trigger_event(EventLabel::InitFailure, json!({ "error": e.to_string() }));
            }
        }
    }

    /// Close the live endpoint and wait for its loops to exit. No-op if none.
    pub fn stop(&mut self) {
        let Some(mut endpoint) = self.endpoint.take() else {
            return;
        };
        endpoint.close();
        self.epoch += 1;
        self.clients.clear();
        self.state = SessionState::Stopped;
        tracing::info!(session = %self.uuid, "Session stopped");
    }

    /// Send a message: broadcast (server) or to the server (client).
    ///
    /// No-op without a live endpoint.
    ///
    /// # Errors
    /// Returns error if the message uses a reserved or empty verb.
    pub fn send(&mut self, message: Message) -> Result<(), SessionError> {
        validate(&message)?;
        self.transmit(None, message);
        Ok(())
    }

    /// Send `content` tagged with `verb`.
    ///
    /// # Errors
    /// Returns error if `verb` is reserved or empty.
    pub fn trigger(&mut self, verb: impl Into<String>, content: Value) -> Result<(), SessionError> {
        self.send(Message::new(verb, content))
    }

    /// Answer the peer an event came from: its client (server) or the server (client).
    ///
    /// # Errors
    /// Returns error if `verb` is reserved or empty.
    pub fn reply(
        &mut self,
        event: &Event,
        verb: impl Into<String>,
        content: Value,
    ) -> Result<(), SessionError> {
        let message = Message::new(verb, content);
        validate(&message)?;
        self.transmit(event.client(), message);
        Ok(())
    }

    /// Close one client's connection (server) or this session (client).
    ///
    /// No-op without a live endpoint or for an unknown client.
    pub fn disconnect_client(&mut self, client: Option<ClientId>) {
        match self.mode {
            Mode::Client => self.stop(),
            Mode::Server => {
                if let (Some(endpoint), Some(client)) = (self.endpoint.as_mut(), client) {
                    endpoint.disconnect(client);
                }
            }
        }
    }

    /// Inject an event; it is dispatched on the next tick.
    pub fn trigger_event(&self, label: EventLabel, payload: Value) {
        self.queue
            .push(Event::new(label, payload).stamped(self.uuid, self.epoch));
    }

    pub(crate) fn send_core(&mut self, verb: CoreVerb, content: Value) {
        self.transmit(None, Message::core(verb, content));
    }

    /// Whether `event` belongs to the current endpoint generation.
    pub(crate) fn is_current(&self, event: &Event) -> bool {
        event.epoch() == self.epoch
    }

    pub(crate) fn registry_mut(&mut self) -> &mut ClientRegistry {
        &mut self.clients
    }

    fn transmit(&mut self, client: Option<ClientId>, message: Message) {
        let Some(endpoint) = self.endpoint.as_mut() else {
            tracing::debug!(verb = ?message.verb, "No live endpoint, dropping message");
            return;
        };
        match client {
            Some(client) if self.mode == Mode::Server => endpoint.send_to(client, message),
            _ => endpoint.send(message),
        }
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn validate(message: &Message) -> Result<(), SessionError> {
    match message.verb.as_deref() {
        Some("") => Err(SessionError::EmptyVerb),
        Some(verb) if CoreVerb::is_reserved(verb) => {
            Err(SessionError::ReservedVerb(verb.to_string()))
        }
        _ => Ok(()),
    }
}
