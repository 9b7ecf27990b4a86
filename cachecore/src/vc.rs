use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use evcore::{Continuation, Event, ProxyMutex};
use parking_lot::Mutex;

use crate::alternate::{Alternate, AlternateVector};
use crate::dir::DirEntry;
use crate::doc::Doc;
use crate::error::Error;
use crate::event::CacheEventCode;
use crate::key::CryptoKey;
use crate::stripe::{ReadOutcome, Stripe};
use diskaio::AioRequest;

/// What a `CacheVC` was opened to do ("Cache VC"). `Evacuate` is
/// driven internally by a stripe's own evacuator, never by an external
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcOp {
    Read,
    Write,
    Update,
    Evacuate,
}

/// Flag bits carried on a `CacheVC` . Kept as a small struct of
/// `bool`s rather than a bitset — there are few enough of them that a
/// packed representation would just cost readability.
#[derive(Debug, Clone, Copy, Default)]
pub struct VcFlags {
    pub evacuator: bool,
    pub sync: bool,
    pub use_first_key: bool,
    /// Set once this VC has attached as a reader on another VC's in-flight
    /// write (RWW).
    pub attached_rww: bool,
}

/// A single open cache operation against one stripe . Cheaply
/// cloned as an `Arc` so a completion callback (from `diskaio` or from a
/// stripe's RWW wakeup) can reach back into it without the caller having
/// to keep its own handle alive.
pub struct CacheVC {
    pub op: VcOp,
    pub first_key: CryptoKey,
    pub earliest_key: CryptoKey,
    pub key: CryptoKey,
    pub flags: VcFlags,
    mutex: Arc<ProxyMutex>,
    stripe: Arc<Stripe>,
    vector: Mutex<AlternateVector>,
    closed: AtomicBool,
    agg_len: std::sync::atomic::AtomicU64,
}

impl CacheVC {
    pub fn new(op: VcOp, key: CryptoKey, flags: VcFlags, stripe: Arc<Stripe>) -> Arc<Self> {
        if op == VcOp::Write {
            stripe.begin_write(key);
        }
        Arc::new(Self {
            op,
            first_key: key,
            earliest_key: key,
            key,
            flags,
            mutex: ProxyMutex::new(),
            stripe,
            vector: Mutex::new(AlternateVector::new()),
            closed: AtomicBool::new(false),
            agg_len: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Looks up the object's alternate vector and selects a variant for
    /// `request_digest` ("open_read"). On a Dir hit, an object that
    /// carries no alternate vector resolves unconditionally; one that does
    /// must have a stored alternate matching `request_digest`, or the read
    /// fails exactly as if the entry were never there (the "alternate
    /// deletion" case: the vector survives but no alternate in it answers
    /// this request). On a Dir miss, attaches to an in-flight write (RWW)
    /// if some writer currently holds the key, rather than always treating
    /// a miss as read-while-write.
    pub fn open_read(
        &self,
        request_digest: u64,
        continuation: Arc<dyn Continuation>,
    ) -> CacheEventCode {
        match self.stripe.lookup(&self.key) {
            Some(_entry) => {
                let vector = self.stripe.alternate_vector(&self.first_key);
                let code = if vector.is_empty() || vector.select(request_digest).is_some() {
                    CacheEventCode::OpenReadSuccess
                } else {
                    CacheEventCode::OpenReadFailed
                };
                *self.vector.lock() = vector;
                code
            }
            None if self.stripe.has_active_writer(&self.key) => {
                self.stripe.attach_reader(self.key, continuation);
                CacheEventCode::OpenReadRww
            }
            None => CacheEventCode::OpenReadFailed,
        }
    }

    /// Selects an alternate for `request_digest` against an already-loaded
    /// vector ("select"); distinct from `open_read`, which also
    /// performs the directory lookup.
    pub fn select_alternate(&self, request_digest: u64) -> Option<Alternate> {
        self.vector.lock().select(request_digest).cloned()
    }

    /// Drives the actual body fetch for a VC already reporting
    /// `OpenReadSuccess` ("do_io_read"): a RAM cache hit resolves
    /// synchronously, otherwise an AIO read is dispatched and `continuation`
    /// fires again on completion.
    pub fn begin_read(&self, continuation: Arc<dyn Continuation>) -> ReadOutcome {
        self.stripe.begin_read(&self.key, continuation)
    }

    /// Completes a dispatched `begin_read`, decoding and checksumming the
    /// fetched record ("checksum").
    pub fn finish_read(&self, request: &AioRequest) -> Result<Vec<u8>, Error> {
        self.stripe.finish_read(&self.key, request)
    }

    /// Stages a write for this VC's object. A `NeedsFlush`-class rejection
    /// from the stripe is surfaced to the caller as `Err` so it can retry
    /// after a flush — ordinary backpressure, not a failure of the write
    /// itself.
    pub fn do_io_write(&self, doc: &Doc) -> Result<(CryptoKey, DirEntry), Error> {
        let staged = self.stripe.stage_write(doc, self.flags.evacuator)?;
        self.agg_len.fetch_add(doc.len, Ordering::Relaxed);
        Ok((
            self.key,
            DirEntry {
                offset: staged.offset,
                approx_size: doc.len as u32,
                tag: self.key.tag(),
                phase: staged.phase,
                next: crate::dir::DIR_NIL,
            },
        ))
    }

    /// Flushes whatever this VC has staged since the last flush, notifying
    /// `continuation` on completion ("reenable" driving the next
    /// fragment's write once the previous one lands).
    pub fn flush(&self, entries: Vec<(CryptoKey, DirEntry)>, continuation: Arc<dyn Continuation>) {
        self.stripe.flush(entries, continuation);
    }

    /// Closes this VC ("do_io_close"). `err` distinguishes a
    /// clean close from an abort: on abort before any fragment committed,
    /// any readers this VC's write had attached are released with
    /// `VC_EOS` ("abort before any fragment" scenario) rather than
    /// ever seeing a directory entry for the object.
    pub fn do_io_close(&self, err: Option<Error>) {
        self.closed.store(true, Ordering::Release);
        if self.op == VcOp::Write {
            self.stripe.end_write(&self.key);
            if err.is_some() {
                self.stripe.abort_write(&self.key);
            }
        }
    }

    pub fn mutex(&self) -> &Arc<ProxyMutex> {
        &self.mutex
    }
}

/// Minimal `Continuation` adapter so a `CacheVC` itself can sit in the
/// scheduler's dispatch path (e.g. as the completion target of its own
/// aggregation flush) without every caller needing to define one.
pub struct VcContinuation {
    pub vc: Arc<CacheVC>,
    pub on_event: Box<dyn Fn(&CacheVC, &Event) + Send + Sync>,
}

impl Continuation for VcContinuation {
    fn mutex(&self) -> &Arc<ProxyMutex> {
        self.vc.mutex()
    }

    fn handle(&self, event: &Event) -> evcore::DispatchResult {
        (self.on_event)(&self.vc, event);
        evcore::DispatchResult::Done
    }
}
