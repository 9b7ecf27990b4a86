use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::continuation::Continuation;
use crate::mutex::ThreadId;

/// Small integer event code delivered alongside a dispatch. Values are
/// not part of any external compatibility contract — callers match on
/// the enum, never the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackCode {
    Immediate,
    TimerFired,
    AioDone,
    Custom(u32),
}

/// Flags carried on an [`Event`]. `internal` marks events synthesized by the
/// scheduler itself (timer promotion, retry reschedule) as opposed to ones a
/// continuation scheduled directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFlags {
    pub internal: bool,
}

impl EventFlags {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Scheduler record pairing a continuation with a deadline/period.
pub struct Event {
    pub continuation: Arc<dyn Continuation>,
    /// Absolute deadline. `None` means "ready now" (an immediate event).
    pub timeout_at: Option<Instant>,
    /// `Some(period)` re-enqueues the event `period` after each dispatch
    /// that returns [`crate::DispatchResult::Continue`]; `None` is one-shot.
    pub period: Option<Duration>,
    pub cookie: u64,
    pub callback_code: CallbackCode,
    pub flags: EventFlags,
    /// Affinity: when set, scheduling this event targets this thread
    /// specifically ("Affinity").
    pub affinity: Option<ThreadId>,
    /// Shared with the [`Action`] handed back to whoever scheduled this
    /// event, so cancellation works even after the event has been moved
    /// into a queue the caller no longer has direct access to.
    cancelled: Arc<AtomicBool>,
}

/// Handle returned by a scheduling call, cancellable by the caller.
/// Cancelling suppresses delivery but the event slot is only reclaimed
/// when the dispatching thread next looks at it.
#[derive(Clone)]
pub struct Action {
    cancelled: Arc<AtomicBool>,
}

impl Action {
    /// Cancellers must hold the continuation's mutex — that is a caller
    /// obligation this type cannot check (it does not know which mutex
    /// the event's continuation uses internally vs. externally); the
    /// dispatcher only trusts this flag once it itself holds that mutex.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Event {
    pub fn new(continuation: Arc<dyn Continuation>, callback_code: CallbackCode) -> Self {
        Self {
            continuation,
            timeout_at: None,
            period: None,
            cookie: 0,
            callback_code,
            flags: EventFlags::empty(),
            affinity: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a cancellable [`Action`] sharing this event's cancel flag.
    /// Scheduling APIs in `evthread`/`diskaio` call this once, right before
    /// moving the event into a queue, and hand the `Action` back to the
    /// caller.
    pub fn action(&self) -> Action {
        Action {
            cancelled: self.cancelled.clone(),
        }
    }

    pub fn at(mut self, when: Instant) -> Self {
        self.timeout_at = Some(when);
        self
    }

    pub fn every(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self.timeout_at = Some(Instant::now() + period);
        self
    }

    pub fn with_affinity(mut self, thread: ThreadId) -> Self {
        self.affinity = Some(thread);
        self
    }

    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    /// Sets the cancelled flag directly (equivalent to `self.action().cancel()`).
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether this event's deadline has passed relative to `now`. Immediate
    /// events (`timeout_at == None`) are always ready.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.timeout_at {
            None => true,
            Some(t) => t <= now,
        }
    }
}
