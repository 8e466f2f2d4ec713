//! Test helpers: an event queue standing in for a session.

use std::{
    cell::RefCell,
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use peerlink_core::{Event, EventLabel, EventQueue, EventSink, SessionParams};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

pub(crate) fn test_params(max_connections: usize) -> SessionParams {
    SessionParams::new("127.0.0.1", 0)
        .with_max_connections(max_connections)
        .with_policy_port(None)
}

pub(crate) struct Harness {
    queue: Arc<EventQueue>,
    session: Uuid,
    backlog: RefCell<VecDeque<Event>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            queue: Arc::new(EventQueue::new()),
            session: Uuid::new_v4(),
            backlog: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn sink(&self) -> EventSink {
        EventSink::new(Arc::clone(&self.queue), self.session, 0)
    }

    /// Pump the queue until an event with `label` shows up; earlier
    /// events with other labels stay available to later waits.
    pub(crate) fn wait_for(&self, label: EventLabel) -> Event {
        let deadline = Instant::now() + WAIT;
        loop {
            self.queue.drain_and_dispatch(|event| {
                self.backlog.borrow_mut().push_back(event);
                Ok(())
            });

            let mut backlog = self.backlog.borrow_mut();
            if let Some(index) = backlog.iter().position(|e| e.label() == label) {
                if let Some(event) = backlog.remove(index) {
                    return event;
                }
            }
            drop(backlog);

            assert!(Instant::now() < deadline, "timed out waiting for {label:?}");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Address from the next `InitSuccess`.
    pub(crate) fn bound_address(&self) -> String {
        let event = self.wait_for(EventLabel::InitSuccess);
        event.payload()["address"]
            .as_str()
            .expect("InitSuccess carries an address")
            .to_string()
    }
}
