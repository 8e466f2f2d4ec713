//! Contracts between a session and the transport it drives.

use thiserror::Error;
use uuid::Uuid;

use crate::config::{Mode, SessionParams};
use crate::event::ClientId;
use crate::message::Message;
use crate::queue::EventSink;

/// Transport construction error.
///
/// Failures that happen after construction (bind, connect, accept, read,
/// write) are reported as events through the endpoint's [`EventSink`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to start I/O runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// A transport-owning endpoint (server or client variant).
///
/// Every method is called from the consumer context and must return
/// promptly; socket work happens on the endpoint's own execution context
/// and is reported as events.
pub trait NetworkEndpoint: Send {
    /// The endpoint's own stable id.
    fn identity(&self) -> Uuid;

    /// Transmit to the server (client) or broadcast to every client (server).
    fn send(&mut self, message: Message);

    /// Transmit to one client (server). Clients send to the server.
    fn send_to(&mut self, client: ClientId, message: Message);

    /// Forcibly close one client connection. No-op if it is already gone.
    fn disconnect(&mut self, client: ClientId);

    /// Ids of live connections, in connection order. Empty for clients.
    fn clients(&self) -> Vec<ClientId>;

    /// Release the socket and wait for the background loops to exit.
    ///
    /// Idempotent.
    fn close(&mut self);
}

/// Builds endpoints for a session on each `start`.
pub trait Connector: Send {
    /// Construct an endpoint for `mode` that reports into `sink`.
    ///
    /// # Errors
    /// Returns error if the endpoint's execution context cannot be created.
    fn open(
        &self,
        mode: Mode,
        params: &SessionParams,
        sink: EventSink,
    ) -> Result<Box<dyn NetworkEndpoint>, TransportError>;
}
