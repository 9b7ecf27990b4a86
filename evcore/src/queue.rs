use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::event::Event;

/// External MPSC queue feeding one thread.
///
/// Producers call [`push`](Self::push) from any thread; the owning thread
/// calls [`drain`](Self::drain) to atomically swap out everything queued
/// since the last drain. Kept unbounded since back-pressure for cache
/// writes is enforced earlier, at the aggregation buffer's own admission
/// check, not at the event queue.
pub struct ProtectedQueue {
    inner: Mutex<VecDeque<Event>>,
}

impl ProtectedQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Called by any thread to hand an event to the owner.
    pub fn push(&self, event: Event) {
        self.inner.lock().push_back(event);
    }

    /// Called only by the owning thread. Removes and returns everything
    /// queued, in submission order.
    pub fn drain(&self) -> Vec<Event> {
        let mut guard = self.inner.lock();
        guard.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ProtectedQueue {
    fn default() -> Self {
        Self::new()
    }
}
