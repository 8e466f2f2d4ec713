//! Thread-safe event queue bridging endpoint I/O and the host tick.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde_json::Value;

use crate::event::{ClientId, Event, EventLabel, SessionId};
use crate::message::Message;

/// Pending events awaiting the next tick.
///
/// Producers call [`EventQueue::push`] from any thread. The single consumer
/// calls [`EventQueue::drain_and_dispatch`] once per tick; it swaps the whole
/// buffer out under the lock and runs the handler with the lock released, so
/// a handler that enqueues (a reply, a re-emitted event) never deadlocks and
/// its events land in the next tick.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Mutex<Vec<Event>>,
    draining: AtomicBool,
}

impl EventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Never blocks beyond the buffer swap, never fails.
    pub fn push(&self, event: Event) {
        self.lock().push(event);
    }

    /// Number of events waiting for the next drain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every event queued so far and hand each to `handler` in order.
    ///
    /// A handler error or panic is logged and the drain moves on to the
    /// next event. Re-entrant calls from inside a handler are refused and
    /// return 0. Returns the number of events taken.
    pub fn drain_and_dispatch<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(Event) -> anyhow::Result<()>,
    {
        if self.draining.swap(true, Ordering::AcqRel) {
            tracing::warn!("Ignoring re-entrant drain of event queue");
            return 0;
        }

        let batch = std::mem::take(&mut *self.lock());
        let count = batch.len();

        for event in batch {
            let label = event.label();
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(?label, "Event handler failed: {e:#}"),
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(?label, "Event handler panicked: {reason}");
                }
            }
        }

        self.draining.store(false, Ordering::Release);
        count
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer handle given to an endpoint instance.
///
/// Stamps every event with the owning session and the endpoint's epoch so
/// the session can discard events from an endpoint it already stopped.
#[derive(Debug, Clone)]
pub struct EventSink {
    queue: Arc<EventQueue>,
    session: SessionId,
    epoch: u64,
}

impl EventSink {
    #[must_use]
    pub const fn new(queue: Arc<EventQueue>, session: SessionId, epoch: u64) -> Self {
        Self {
            queue,
            session,
            epoch,
        }
    }

    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Enqueue an event.
    pub fn emit(&self, event: Event) {
        self.queue.push(event.stamped(self.session, self.epoch));
    }

    /// Enqueue a non-message event.
    pub fn signal(&self, label: EventLabel, payload: Value) {
        self.emit(Event::new(label, payload));
    }

    /// Enqueue a message-family event.
    pub fn message(&self, label: EventLabel, message: Message, client: Option<ClientId>) {
        self.emit(Event::message(label, message).with_client(client));
    }

    /// Enqueue a `MessageSentFailed` event for `message`.
    pub fn send_failed(&self, message: Message, client: Option<ClientId>, error: &str) {
        let Message { verb, content } = message;
        let payload = serde_json::json!({ "content": content, "error": error });
        let failed = Message { verb, content: payload };
        self.message(EventLabel::MessageSentFailed, failed, client);
    }
}
