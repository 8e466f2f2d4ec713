//! Fallback tick source for hosts without their own loop.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::Session;

/// A thread that pumps a session at a fixed interval.
///
/// The session moves onto the thread; [`Ticker::join`] hands it back.
pub struct Ticker {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Session>>,
}

impl Ticker {
    pub(crate) fn spawn(mut session: Session, interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("peerlink-tick".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while flag.load(Ordering::Acquire) {
                    session.pump();
                    next += interval;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst of ticks.
                        next = now;
                    }
                }
                session
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop ticking and get the session back. `None` if the tick thread panicked.
    #[must_use]
    pub fn join(mut self) -> Option<Session> {
        self.finish()
    }

    fn finish(&mut self) -> Option<Session> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(session) => Some(session),
            Err(_) => {
                tracing::error!("Tick thread panicked");
                None
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

impl Session {
    /// Pump this session from a dedicated thread every `tick_interval_ms`.
    ///
    /// # Errors
    /// Returns error if the thread cannot be spawned; the session is dropped.
    pub fn spawn_ticker(self) -> io::Result<Ticker> {
        let interval = self.peer().params().tick_interval();
        Ticker::spawn(self, interval)
    }
}
