use std::sync::Arc;

use evcore::{CallbackCode, Continuation};
use evthread::EThreadHandle;
use parking_lot::Mutex;
use rustix::fd::OwnedFd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AioOp {
    Read,
    Write,
}

/// Result of one completed request: bytes transferred, or the negated
/// errno the worker (or the fault injector standing in front of it)
/// returned ("Contract": `aio_result = bytes_transferred` or
/// `-errno`).
#[derive(Debug, Clone, Copy)]
pub struct AioOutcome {
    pub result: Result<usize, i32>,
}

/// One `pread`/`pwrite` against `fd` at `offset` for `nbytes` bytes.
/// `buf` holds the write payload going in, or is filled with the
/// read payload coming out; it is a `Mutex` only so a continuation
/// handler can read it back through the same `Arc` it submitted, without
/// the dispatcher needing `&mut` access across the worker-thread boundary.
pub struct AioRequest {
    pub fd: Arc<OwnedFd>,
    pub op: AioOp,
    pub offset: u64,
    pub nbytes: usize,
    pub buf: Mutex<Vec<u8>>,
    pub outcome: Mutex<Option<AioOutcome>>,
}

impl AioRequest {
    pub fn read(fd: Arc<OwnedFd>, offset: u64, nbytes: usize) -> Arc<Self> {
        Arc::new(Self {
            fd,
            op: AioOp::Read,
            offset,
            nbytes,
            buf: Mutex::new(vec![0u8; nbytes]),
            outcome: Mutex::new(None),
        })
    }

    pub fn write(fd: Arc<OwnedFd>, offset: u64, data: Vec<u8>) -> Arc<Self> {
        let nbytes = data.len();
        Arc::new(Self {
            fd,
            op: AioOp::Write,
            offset,
            nbytes,
            buf: Mutex::new(data),
            outcome: Mutex::new(None),
        })
    }

    pub fn outcome(&self) -> Option<AioOutcome> {
        *self.outcome.lock()
    }

    /// Takes the read buffer, leaving an empty `Vec` behind. Meant to be
    /// called once, by the continuation handling the completion event.
    pub fn take_buf(&self) -> Vec<u8> {
        std::mem::take(&mut *self.buf.lock())
    }
}

/// A chained group of requests against the same fd ("Chained
/// operations"): the dispatcher performs every request in `requests` in
/// order and fires `continuation` exactly once, on the final completion,
/// with `callback_code`. A single-request submission is just a
/// one-element `AioVec` — there is no separate non-chained path.
pub struct AioVec {
    pub requests: Vec<Arc<AioRequest>>,
    pub continuation: Arc<dyn Continuation>,
    pub callback_code: CallbackCode,
    /// `None` dispatches the completion continuation directly on the AIO
    /// worker thread; `Some` hands it to that event thread's external
    /// queue instead.
    pub target: Option<Arc<EThreadHandle>>,
}

impl AioVec {
    pub fn single(
        request: Arc<AioRequest>,
        continuation: Arc<dyn Continuation>,
        target: Option<Arc<EThreadHandle>>,
    ) -> Self {
        Self {
            requests: vec![request],
            continuation,
            callback_code: CallbackCode::AioDone,
            target,
        }
    }
}
