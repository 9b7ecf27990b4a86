use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Generation-counter wakeup used for the event loop's tail: a worker
/// blocks for up to the time until its next timed event, but wakes early
/// the moment any thread pushes work onto its external queue.
pub(crate) struct WakeSignal {
    generation: Mutex<u64>,
    cv: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn notify(&self) {
        let mut g = self.generation.lock();
        *g = g.wrapping_add(1);
        self.cv.notify_all();
    }

    /// Blocks until the generation differs from `last_seen` or `timeout`
    /// elapses, whichever comes first. Returns the generation observed.
    pub fn wait(&self, last_seen: u64, timeout: Duration) -> u64 {
        let mut g = self.generation.lock();
        if *g != last_seen {
            return *g;
        }
        let _ = self.cv.wait_for(&mut g, timeout);
        *g
    }
}
