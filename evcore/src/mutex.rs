use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex as RawMutex;

/// Dense, recyclable identity for a live event-loop thread ("Thread
/// identity for locks"). `evthread` hands these out and recycles them on
/// thread exit; `ProxyMutex` only ever compares them, it never allocates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(pub usize);

static NEXT_RECYCLABLE: AtomicUsize = AtomicUsize::new(0);

impl ThreadId {
    /// Allocates a fresh id. `evthread::EventProcessor` calls this once per
    /// worker at startup; ids below the pool size are stable for the life of
    /// the process, so callers may use them to index per-thread slots.
    pub fn allocate() -> Self {
        ThreadId(NEXT_RECYCLABLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// A reference-counted recursive lock with holder identity .
///
/// Every [`Continuation`](crate::Continuation) owns one of these via `Arc`.
/// A continuation's handler may only be invoked by the thread currently
/// holding its mutex — `evthread`'s dispatcher enforces this with
/// `try_lock`/`unlock` around every handler call.
pub struct ProxyMutex {
    inner: RawMutex<()>,
    thread_holding: AtomicU64,
    nthread_holding: AtomicU64,
}

/// Sentinel stored in `thread_holding` when the mutex is unheld. `ThreadId`
/// is zero-based so we bias by one to keep zero free for "nil".
const NO_HOLDER: u64 = u64::MAX;

impl ProxyMutex {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RawMutex::new(()),
            thread_holding: AtomicU64::new(NO_HOLDER),
            nthread_holding: AtomicU64::new(0),
        })
    }

    /// The thread presently holding this mutex, if any.
    pub fn thread_holding(&self) -> Option<ThreadId> {
        match self.thread_holding.load(Ordering::Acquire) {
            NO_HOLDER => None,
            id => Some(ThreadId(id as usize)),
        }
    }

    /// True if `thread` currently holds this mutex (possibly recursively).
    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        self.thread_holding() == Some(thread)
    }

    /// Non-blocking acquire. Recursive: a thread already holding the lock
    /// succeeds again and bumps the recursion depth.
    pub fn try_lock(&self, thread: ThreadId) -> bool {
        if self.is_held_by(thread) {
            self.nthread_holding.fetch_add(1, Ordering::AcqRel);
            return true;
        }
        match self.inner.try_lock() {
            Some(guard) => {
                std::mem::forget(guard); // paired with force_unlock in unlock()
                self.thread_holding.store(thread.0 as u64, Ordering::Release);
                self.nthread_holding.store(1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Blocking acquire. Used off the event-loop fast path (e.g. by a
    /// synchronous test driver); production dispatch always uses
    /// `try_lock` per the "never block a worker thread" contract.
    pub fn lock(&self, thread: ThreadId) {
        if self.try_lock(thread) {
            return;
        }
        let guard = self.inner.lock();
        std::mem::forget(guard); // paired with force_unlock in unlock()
        self.thread_holding.store(thread.0 as u64, Ordering::Release);
        self.nthread_holding.store(1, Ordering::Release);
    }

    /// Only `thread_holding` may call this (invariant). Decrements
    /// the recursion count and releases the OS mutex at zero.
    pub fn unlock(&self, thread: ThreadId) {
        debug_assert!(
            self.is_held_by(thread),
            "unlock called by a thread that does not hold the mutex"
        );
        let remaining = self.nthread_holding.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            self.thread_holding.store(NO_HOLDER, Ordering::Release);
            // Safety: we balance the forgotten guard from try_lock/lock with
            // exactly one unlock of the underlying raw mutex here.
            unsafe {
                self.inner.force_unlock();
            }
        }
    }
}

// parking_lot's `try_lock` returns a guard tied to the mutex's lifetime; we
// want to hold the raw lock across the continuation handler call without
// threading the guard through every call site, so we intentionally leak the
// guard and pair it with exactly one `force_unlock` in `unlock` above. This
// is the same "manual critical section" shape as the ATS ProxyMutex this is
// modeled on, which is also just an OS mutex plus holder bookkeeping.

impl std::fmt::Debug for ProxyMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyMutex")
            .field("thread_holding", &self.thread_holding())
            .field("nthread_holding", &self.nthread_holding.load(Ordering::Relaxed))
            .finish()
    }
}
