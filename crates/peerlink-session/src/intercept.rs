//! Core-verb interception and client bookkeeping.

use peerlink_core::{ClientRecord, CoreVerb, Event, EventLabel, Mode};
use serde_json::{Value, json};

use crate::peer::Peer;

/// What the session does with an event before listeners see it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interception {
    /// Deliver to listeners as usual.
    Pass,
    /// Handled internally; listeners never see it.
    Consumed,
    /// The server rejected us: surface `ServerFull`, then stop.
    ServerFull,
}

pub(crate) fn intercept(peer: &mut Peer, event: &Event) -> Interception {
    if event.label() != EventLabel::MessageReceived {
        return Interception::Pass;
    }
    match event.core_verb() {
        None => Interception::Pass,
        Some(CoreVerb::SyncClientData) => {
            sync_client(peer, event);
            Interception::Consumed
        }
        Some(CoreVerb::ServerFull) => server_full(peer, event),
    }
}

/// Only a client can be rejected for capacity, and only by its server.
fn server_full(peer: &Peer, event: &Event) -> Interception {
    match (peer.mode(), event.client()) {
        (Mode::Client, None) => Interception::ServerFull,
        (mode, client) => {
            tracing::warn!(?mode, ?client, "Ignoring capacity rejection sent by a client");
            Interception::Consumed
        }
    }
}

fn sync_client(peer: &mut Peer, event: &Event) {
    let Some(client) = event.client() else {
        tracing::warn!("Ignoring identity sync with no originating client");
        return;
    };
    let Some(synced_id) = event.payload().get("uuid").and_then(Value::as_str) else {
        tracing::warn!(%client, payload = %event.payload(), "Ignoring malformed identity sync");
        return;
    };

    if peer.registry_mut().sync(client, synced_id) {
        tracing::info!(%client, synced_id, "Client identity synced");
    } else {
        tracing::warn!(%client, synced_id, "Identity sync for unknown client");
    }
}

/// Bookkeeping that must happen before listeners see `event`.
pub(crate) fn track_arrival(peer: &mut Peer, event: &Event) {
    if event.label() != EventLabel::Connected {
        return;
    }
    match (peer.mode(), event.client()) {
        (Mode::Server, Some(client)) => {
            let address = event
                .payload()
                .get("address")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            peer.registry_mut().insert(ClientRecord::new(client, address));
        }
        (Mode::Client, _) => {
            let identity = peer.identity();
            peer.send_core(CoreVerb::SyncClientData, json!({ "uuid": identity }));
        }
        (Mode::Server, None) => {}
    }
}

/// Bookkeeping that must wait until listeners have seen `event`.
pub(crate) fn track_departure(peer: &mut Peer, event: &Event) {
    if let (EventLabel::Disconnected, Some(client)) = (event.label(), event.client()) {
        peer.registry_mut().remove(client);
    }
}
