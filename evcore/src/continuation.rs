use std::sync::Arc;

use crate::event::Event;
use crate::mutex::ProxyMutex;

/// What a continuation's handler returns, driving whether the dispatching
/// thread keeps the event alive ("Return codes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// No further dispatch; the event is freed (or re-enqueued if periodic).
    Done,
    /// Keep the event alive; the caller is responsible for rescheduling it.
    Continue,
    /// Ask the dispatcher to run this same event again immediately.
    Restart,
    /// Ask the dispatcher to reschedule this event after a short delay.
    RestartDelayed,
}

/// A callback object with an owning mutex .
///
/// Invariant enforced by every dispatcher in `evthread`/`diskaio`: `handle`
/// is only ever called while `self.mutex()` is held by the calling thread.
/// Implementors do not need to lock anything themselves — the dispatcher
/// does that — but they must not stash `self` across a suspension point
/// without going back through the scheduler.
pub trait Continuation: Send + Sync {
    /// The mutex that must be held for `handle` to run.
    fn mutex(&self) -> &Arc<ProxyMutex>;

    /// Handle one event. Called with `self.mutex()` held by the calling
    /// thread (debug builds assert this in the dispatcher, not here, since
    /// asserting inside every impl would be Ambient ceremony the original
    /// pushes into one place instead).
    fn handle(&self, event: &Event) -> DispatchResult;
}
