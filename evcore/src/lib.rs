//! Continuation/Event primitives and the queues that feed an event loop.
//!
//! This crate has no threads and no I/O: [`evthread`](../evthread) supplies
//! the thread that drains [`ProtectedQueue`] and promotes [`PriorityQueue`]
//! buckets, and [`diskaio`](../diskaio) supplies the AIO completions that
//! ride as [`Event`]s back through it.

mod continuation;
mod event;
mod mutex;
mod queue;
mod timerwheel;

pub use continuation::{Continuation, DispatchResult};
pub use event::{Action, CallbackCode, Event, EventFlags};
pub use mutex::{ProxyMutex, ThreadId};
pub use queue::ProtectedQueue;
pub use timerwheel::PriorityQueue;

use std::time::Duration;

/// Retry delay used when a dispatcher fails to try-lock a continuation's
/// mutex ("Dispatch contract").
pub const MUTEX_RETRY_DELAY: Duration = Duration::from_millis(10);
