//! Socket policy responder for legacy browser-plugin clients.
//!
//! Such clients open a connection to the policy port before they are
//! allowed to use arbitrary-port sockets. The responder answers every
//! connection with the same permissive document, NUL-terminated, and
//! closes it.
//!
//! Client bytes are never parsed or acted on. After the document is written
//! and the write side shut down, the responder keeps reading and discarding
//! input for at most one second (or until the client closes). Closing a
//! socket with unread input makes the kernel send a reset, which can destroy
//! the document before the client has read it.

use std::{io, net::SocketAddr, time::Duration};

use peerlink_core::{EventLabel, EventSink};
use serde_json::json;
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    sync::watch,
    task::JoinSet,
};

use crate::connection;

/// Conventional policy port for this class of server.
pub const STANDARD_POLICY_PORT: u16 = 843;

/// Document granting unrestricted cross-domain socket access.
pub const POLICY_DOCUMENT: &str = concat!(
    r#"<?xml version="1.0"?>"#,
    r#"<!DOCTYPE cross-domain-policy SYSTEM "/xml/dtds/cross-domain-policy.dtd">"#,
    r#"<cross-domain-policy>"#,
    r#"<site-control permitted-cross-domain-policies="master-only"/>"#,
    r#"<allow-access-from domain="*" to-ports="*"/>"#,
    r#"</cross-domain-policy>"#,
);

/// How long a closed connection lingers so the peer can read the document.
const LINGER: Duration = Duration::from_secs(1);

/// The exact bytes written to every connection.
#[must_use]
pub fn policy_bytes() -> Vec<u8> {
    let mut bytes = POLICY_DOCUMENT.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// Listener that answers each connection with [`policy_bytes`].
pub struct PolicyResponder {
    listener: TcpListener,
}

impl PolicyResponder {
    /// Bind the policy port.
    ///
    /// # Errors
    /// Returns error if the address cannot be bound.
    pub async fn bind(address: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address).await?,
        })
    }

    /// Address actually bound.
    ///
    /// # Errors
    /// Returns error if the socket has no local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and answer connections until shutdown is raised.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut responses = JoinSet::new();
        loop {
            tokio::select! {
                () = connection::shutdown_requested(&mut shutdown) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        responses.spawn(async move {
                            if let Err(e) = respond(stream).await {
                                tracing::debug!(%remote, "Policy response failed: {e}");
                            }
                        });
                    }
                    Err(e) => tracing::warn!("Policy accept failed: {e}"),
                },
            }
            while responses.try_join_next().is_some() {}
        }
        responses.shutdown().await;
    }
}

async fn respond(mut stream: TcpStream) -> io::Result<()> {
    connection::write_and_close(&mut stream, &policy_bytes(), LINGER).await
}

/// Run the responder for a server endpoint; bind failures become `SecurityError`.
pub(crate) async fn serve(address: String, sink: EventSink, shutdown: watch::Receiver<bool>) {
    match PolicyResponder::bind(&address).await {
        Ok(responder) => {
            tracing::info!(%address, "Policy responder listening");
            responder.run(shutdown).await;
        }
        Err(e) => {
            tracing::error!(%address, "Policy responder bind failed: {e}");
            sink.signal(
                EventLabel::SecurityError,
                json!({ "address": address, "error": e.to_string() }),
            );
        }
    }
}
