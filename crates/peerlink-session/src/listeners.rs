//! Listener registry keyed by event label.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
};

use anyhow::Context as _;
use peerlink_core::{Event, EventLabel};

use crate::peer::Peer;

/// A registered listener.
pub type Callback = Box<dyn FnMut(&Event, &mut Peer) -> anyhow::Result<()> + Send>;

/// Callbacks per label, invoked in registration order.
#[derive(Default)]
pub(crate) struct Listeners {
    by_label: HashMap<EventLabel, Vec<Callback>>,
}

impl Listeners {
    pub(crate) fn add(&mut self, label: EventLabel, callback: Callback) {
        self.by_label.entry(label).or_default().push(callback);
    }

    pub(crate) fn count(&self, label: EventLabel) -> usize {
        self.by_label.get(&label).map_or(0, Vec::len)
    }

    /// Run every listener for the event's label; stops at the first error.
    ///
    /// A panicking listener counts as an error, so the caller's bookkeeping
    /// after dispatch always runs.
    pub(crate) fn dispatch(&mut self, event: &Event, peer: &mut Peer) -> anyhow::Result<()> {
        let Some(callbacks) = self.by_label.get_mut(&event.label()) else {
            return Ok(());
        };
        for (index, callback) in callbacks.iter_mut().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event, peer)))
                .unwrap_or_else(|panic| {
                    Err(anyhow::anyhow!("panicked: {}", panic_reason(&*panic)))
                });
            outcome.with_context(|| {
                format!(
                    "listener #{index} for {:?} (verb {:?})",
                    event.label(),
                    event.verb()
                )
            })?;
        }
        Ok(())
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
