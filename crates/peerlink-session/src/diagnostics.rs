//! Built-in observer that logs every delivered event.

use peerlink_core::{Event, EventLabel};

pub(crate) fn observe(event: &Event) {
    let label = event.label();
    let client = event.client();
    let payload = event.payload();

    match label {
        EventLabel::MessageReceived | EventLabel::MessageSent => {
            tracing::debug!(?label, verb = ?event.verb(), ?client, "Message event");
        }
        EventLabel::MessageSentFailed
        | EventLabel::SecurityError
        | EventLabel::InitFailure
        | EventLabel::ServerFull => {
            tracing::warn!(?label, ?client, %payload, "Session event");
        }
        EventLabel::Connected
        | EventLabel::Disconnected
        | EventLabel::InitSuccess
        | EventLabel::Closed => {
            tracing::info!(?label, ?client, %payload, "Session event");
        }
    }
}
