//! The public session facade.

use peerlink_core::{
    ClientId, ClientRecord, Connector, Event, EventLabel, Message, Mode, SessionId, SessionParams,
};
use peerlink_transport::TcpConnector;
use serde_json::Value;

use crate::{
    diagnostics,
    intercept::{self, Interception},
    listeners::Listeners,
    peer::{Peer, SessionError, SessionState},
};

/// A peer that plays server or client, driven by the host's tick.
///
/// Socket I/O runs on the endpoint's own threads and is only ever observed
/// through [`Session::pump`], which the host calls once per tick. Every
/// listener runs inside `pump`, on the host's thread, in arrival order.
///
/// # Example
/// ```ignore
/// let mut session = Session::new(Mode::Client, SessionParams::new("127.0.0.1", 7000));
/// session.on("click", |content, _event, _peer| {
///     println!("clicked at {content}");
///     Ok(())
/// });
/// session.start();
/// loop {
///     session.pump();
///     // render frame...
/// }
/// ```
pub struct Session {
    peer: Peer,
    listeners: Listeners,
}

impl Session {
    /// Create a session using TCP endpoints.
    #[must_use]
    pub fn new(mode: Mode, params: SessionParams) -> Self {
        Self::with_connector(mode, params, TcpConnector)
    }

    /// Create a session whose endpoints come from `connector`.
    #[must_use]
    pub fn with_connector(
        mode: Mode,
        params: SessionParams,
        connector: impl Connector + 'static,
    ) -> Self {
        Self {
            peer: Peer::new(mode, params, Box::new(connector)),
            listeners: Listeners::default(),
        }
    }

    /// Listen for messages tagged `verb`; `callback` gets the message content.
    ///
    /// Listeners for the same verb all run, in registration order.
    pub fn on<F>(&mut self, verb: impl Into<String>, mut callback: F)
    where
        F: FnMut(&Value, &Event, &mut Peer) -> anyhow::Result<()> + Send + 'static,
    {
        let verb = verb.into();
        self.listeners.add(
            EventLabel::MessageReceived,
            Box::new(move |event, peer| {
                if event.verb() == Some(verb.as_str()) {
                    callback(event.payload(), event, peer)
                } else {
                    Ok(())
                }
            }),
        );
    }

    /// Listen for every event with `label`.
    pub fn on_event<F>(&mut self, label: EventLabel, callback: F)
    where
        F: FnMut(&Event, &mut Peer) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.add(label, Box::new(callback));
    }

    /// Number of listeners registered for `label`.
    #[must_use]
    pub fn listener_count(&self, label: EventLabel) -> usize {
        self.listeners.count(label)
    }

    /// Dispatch every event queued since the last tick. Returns how many were taken.
    ///
    /// Events raised while dispatching wait for the next call.
    pub fn pump(&mut self) -> usize {
        let queue = self.peer.queue();
        let Self { peer, listeners } = self;
        queue.drain_and_dispatch(|event| dispatch(peer, listeners, event))
    }

    pub fn start(&mut self) {
        self.peer.start();
    }

    pub fn stop(&mut self) {
        self.peer.stop();
    }

    /// See [`Peer::send`].
    ///
    /// # Errors
    /// Returns error if the message uses a reserved or empty verb.
    pub fn send(&mut self, message: Message) -> Result<(), SessionError> {
        self.peer.send(message)
    }

    /// See [`Peer::trigger`].
    ///
    /// # Errors
    /// Returns error if `verb` is reserved or empty.
    pub fn trigger(&mut self, verb: impl Into<String>, content: Value) -> Result<(), SessionError> {
        self.peer.trigger(verb, content)
    }

    pub fn disconnect_client(&mut self, client: Option<ClientId>) {
        self.peer.disconnect_client(client);
    }

    pub fn trigger_event(&self, label: EventLabel, payload: Value) {
        self.peer.trigger_event(label, payload);
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.peer.mode()
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.peer.state()
    }

    #[must_use]
    pub const fn uuid(&self) -> SessionId {
        self.peer.uuid()
    }

    #[must_use]
    pub fn clients(&self) -> &[ClientRecord] {
        self.peer.clients()
    }

    #[must_use]
    pub const fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut Peer {
        &mut self.peer
    }
}

fn dispatch(peer: &mut Peer, listeners: &mut Listeners, event: Event) -> anyhow::Result<()> {
    if !peer.is_current(&event) {
        tracing::debug!(
            label = ?event.label(),
            epoch = event.epoch(),
            "Discarding event from a stopped endpoint"
        );
        return Ok(());
    }
    diagnostics::observe(&event);

    match intercept::intercept(peer, &event) {
        Interception::Pass => {}
        Interception::Consumed => return Ok(()),
        Interception::ServerFull => {
            let full = Event::new(EventLabel::ServerFull, event.payload().clone())
                .stamped(peer.uuid(), event.epoch());
            diagnostics::observe(&full);
            let delivered = listeners.dispatch(&full, peer);
            peer.stop();
            return delivered;
        }
    }

    intercept::track_arrival(peer, &event);
    let delivered = listeners.dispatch(&event, peer);
    intercept::track_departure(peer, &event);
    delivered
}
