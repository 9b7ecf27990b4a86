pub mod agg;
pub mod evac;
pub mod header;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evcore::{CallbackCode, Continuation, Event};
use log::warn;
use parking_lot::Mutex;
use rustix::fd::OwnedFd;

use crate::alternate::AlternateVector;
use crate::dir::{DirEntry, Directory};
use crate::doc::Doc;
use crate::error::Error;
use crate::event::CacheEventCode;
use crate::key::CryptoKey;
use crate::ramcache::RamCache;
use diskaio::{AioBackend, AioRequest, AioVec};

use self::agg::{AggAdmission, AggregationBuffer, EvacuatorBudget};
use self::header::StripeHeader;

/// One fault-isolated slice of a disk ("Stripe"): its own
/// directory, aggregation buffer, RAM cache tier, and evacuation budget.
/// A stripe that hits a hard I/O error takes itself offline independently
/// of every other stripe on the same or a different disk.
pub struct Stripe {
    pub hash_id: u64,
    fd: Arc<OwnedFd>,
    data_offset: u64,
    data_len: u64,
    aio: Arc<dyn AioBackend>,
    header: Mutex<StripeHeader>,
    dir: Mutex<Directory>,
    agg: AggregationBuffer,
    pub ram_cache: Box<dyn RamCache>,
    pub evac_budget: EvacuatorBudget,
    /// Readers attached to an in-flight write, keyed by the object's key:
    /// a `Vec` of waiters under the stripe mutex rather than a channel per
    /// reader.
    rww_waiters: Mutex<HashMap<CryptoKey, Vec<Arc<dyn Continuation>>>>,
    /// Keys currently claimed by an open write VC. A Dir miss for a key in
    /// this set is read-while-write; a miss for a key not in it is a plain
    /// cache miss.
    write_in_flight: Mutex<HashSet<CryptoKey>>,
    /// Alternate vectors staged from a first-fragment Doc's header, keyed
    /// by the object's first key. An empty (or never-staged) vector means
    /// the object carries no variant negotiation at all, so a Dir hit
    /// resolves without needing a digest match.
    alt_vectors: Mutex<HashMap<CryptoKey, AlternateVector>>,
    degraded: std::sync::atomic::AtomicBool,
    next_write_serial: AtomicU64,
}

/// Where a staged Doc landed: the absolute on-disk offset it will occupy
/// once its aggregation buffer is flushed, and the phase it was staged
/// under (committed to the Dir entry once the flush completes).
#[derive(Debug, Clone, Copy)]
pub struct StagedWrite {
    pub offset: u64,
    pub phase: bool,
    pub write_serial: u64,
}

/// Result of [`Stripe::begin_read`].
pub enum ReadOutcome {
    /// Resolved entirely from the RAM cache tier; no disk I/O issued.
    Hit(Vec<u8>),
    /// A `pread` is in flight; `continuation` will fire once it completes,
    /// at which point the caller calls [`Stripe::finish_read`] with this
    /// same request.
    Dispatched(Arc<AioRequest>),
    Miss,
}

impl Stripe {
    pub fn new(
        hash_id: u64,
        fd: Arc<OwnedFd>,
        data_offset: u64,
        data_len: u64,
        aio: Arc<dyn AioBackend>,
        dir_capacity: usize,
        dir_buckets: usize,
        agg_capacity: usize,
        agg_backlog_bytes: usize,
        ram_cache: Box<dyn RamCache>,
        max_concurrent_evacuators: usize,
    ) -> Self {
        Self {
            hash_id,
            fd,
            data_offset,
            data_len,
            aio,
            header: Mutex::new(StripeHeader::initial()),
            dir: Mutex::new(Directory::new(dir_capacity, dir_buckets)),
            agg: AggregationBuffer::new(agg_capacity, agg_backlog_bytes),
            ram_cache,
            evac_budget: EvacuatorBudget::new(max_concurrent_evacuators),
            rww_waiters: Mutex::new(HashMap::new()),
            write_in_flight: Mutex::new(HashSet::new()),
            alt_vectors: Mutex::new(HashMap::new()),
            degraded: std::sync::atomic::AtomicBool::new(false),
            next_write_serial: AtomicU64::new(1),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Release);
    }

    pub fn current_write_pos(&self) -> u64 {
        self.header.lock().write_pos
    }

    /// Bytes currently staged in the aggregation buffer, not yet flushed.
    pub fn agg_pending_bytes(&self) -> usize {
        self.agg.pending_bytes()
    }

    /// Looks up `key`'s directory entry ("Cache VC read path").
    /// Does not itself fetch the Doc's bytes — see [`Stripe::begin_read`]
    /// for that, which checks the RAM cache first.
    pub fn lookup(&self, key: &CryptoKey) -> Option<DirEntry> {
        self.dir.lock().probe(key)
    }

    /// Starts fetching `key`'s stored bytes ("Cache VC read
    /// path"): a RAM cache hit resolves immediately with no disk I/O; a
    /// miss with a directory entry submits the `pread` that will fetch the
    /// Doc record, for the caller to finish via [`Stripe::finish_read`]
    /// once its continuation fires; no entry at all is a cache miss.
    pub fn begin_read(&self, key: &CryptoKey, continuation: Arc<dyn Continuation>) -> ReadOutcome {
        if let Some(body) = self.ram_cache.get(key) {
            return ReadOutcome::Hit(body);
        }
        let Some(entry) = self.dir.lock().probe(key) else {
            return ReadOutcome::Miss;
        };
        let request = AioRequest::read(
            self.fd.clone(),
            self.data_offset + entry.offset,
            entry.approx_size as usize,
        );
        self.aio
            .submit(AioVec::single(request.clone(), continuation, None));
        ReadOutcome::Dispatched(request)
    }

    /// Finishes a read dispatched by [`Stripe::begin_read`]: parses the
    /// `Doc` back out of the completed request's buffer, verifies its
    /// checksum, and warms the RAM cache tier on success so the next
    /// lookup for `key` skips the disk entirely ("RAM cache"
    /// sits in front of a stripe's disk).
    pub fn finish_read(&self, key: &CryptoKey, request: &AioRequest) -> Result<Vec<u8>, Error> {
        let offset = request.offset;
        let outcome = request
            .outcome()
            .ok_or(Error::BadRecord { offset })?;
        let n = outcome
            .result
            .map_err(|errno| Error::StripeIo(std::io::Error::from_raw_os_error(errno)))?;
        let mut buf = request.take_buf();
        buf.truncate(n);
        let doc = Doc::from_bytes(&buf).ok_or(Error::BadRecord { offset })?;
        if !doc.verify_checksum() {
            return Err(Error::ChecksumMismatch {
                offset,
                tag: key.tag(),
            });
        }
        self.ram_cache.put(*key, doc.body.clone());
        Ok(doc.body)
    }

    /// Stages `doc` into the aggregation buffer . On
    /// [`AggAdmission::NeedsFlush`] the caller should call [`Stripe::flush`]
    /// and retry; any other rejection is terminal for this write. A
    /// first-fragment Doc with a non-empty header is parsed and recorded as
    /// that object's alternate vector, so a later `open_read` can select a
    /// variant without fetching the body first.
    pub fn stage_write(&self, doc: &Doc, is_evacuator: bool) -> Result<StagedWrite, Error> {
        if doc.header.len() > agg::MAX_FRAG_SIZE - crate::doc::DOC_HEADER_LEN {
            return Err(Error::FragmentHeaderTooLarge {
                header_len: doc.header.len(),
            });
        }

        let bytes = doc.to_bytes();
        let header = self.header.lock();
        let write_pos = header.write_pos;
        let phase = header.phase;
        drop(header);

        match self.agg.add_writer(&bytes, is_evacuator) {
            Ok(offset_in_buffer) => {
                if doc.key == doc.first_key && !doc.header.is_empty() {
                    if let Some(vector) = AlternateVector::from_bytes(&doc.header) {
                        self.alt_vectors.lock().insert(doc.first_key, vector);
                    }
                }
                Ok(StagedWrite {
                    offset: write_pos + offset_in_buffer as u64,
                    phase,
                    write_serial: self.next_write_serial.fetch_add(1, Ordering::Relaxed),
                })
            }
            Err(AggAdmission::NeedsFlush) => Err(Error::AggregationOverBudget {
                requested: bytes.len(),
            }),
            Err(AggAdmission::Rejected(e)) => Err(e),
        }
    }

    /// Flushes the aggregation buffer with one `pwrite`, advances
    /// `write_pos`, flips the phase bit on wraparound, commits directory
    /// entries for everything in the flush, and wakes any RWW readers
    /// attached to those keys. `entries` pairs each staged write's
    /// absolute offset with the key/tag to commit.
    pub fn flush(
        &self,
        entries: Vec<(CryptoKey, DirEntry)>,
        continuation: Arc<dyn Continuation>,
    ) {
        let bytes = self.agg.drain();
        if bytes.is_empty() {
            return;
        }
        let len = bytes.len() as u64;

        let mut header = self.header.lock();
        let write_pos = header.write_pos;
        let mut new_pos = write_pos + len;
        let wrapped = new_pos >= self.data_len;
        if wrapped {
            new_pos -= self.data_len;
            header.phase = !header.phase;
            header.cycle_serial += 1;
        }
        header.write_pos = new_pos;
        header.sync_serial += 1;
        drop(header);

        {
            let mut dir = self.dir.lock();
            if wrapped {
                dir.flip_phase();
            }
            for (key, entry) in entries {
                if dir.insert(&key, entry).is_err() {
                    warn!("directory full committing flushed entry for stripe {}", self.hash_id);
                }
                self.notify_readers(&key, CacheEventCode::VcWriteComplete.into_callback_code());
            }
        }

        let request = AioRequest::write(self.fd.clone(), self.data_offset + write_pos, bytes);
        self.aio
            .submit(AioVec::single(request, continuation, None));
    }

    /// Attaches a reader continuation to an object's in-flight write
    /// (read-while-write). Woken on the writer's next flush or on abort.
    pub fn attach_reader(&self, key: CryptoKey, cont: Arc<dyn Continuation>) {
        self.rww_waiters.lock().entry(key).or_default().push(cont);
    }

    /// Marks `key` as claimed by an open write VC, so a reader's Dir miss
    /// attaches as read-while-write instead of failing outright.
    pub fn begin_write(&self, key: CryptoKey) {
        self.write_in_flight.lock().insert(key);
    }

    /// Clears `key`'s in-flight marker once its write VC closes, committed
    /// or aborted.
    pub fn end_write(&self, key: &CryptoKey) {
        self.write_in_flight.lock().remove(key);
    }

    /// Whether some open write VC currently claims `key`.
    pub fn has_active_writer(&self, key: &CryptoKey) -> bool {
        self.write_in_flight.lock().contains(key)
    }

    /// Returns the alternate vector staged for `first_key`, or an empty one
    /// if none was ever written (an object with no variant negotiation).
    pub fn alternate_vector(&self, first_key: &CryptoKey) -> AlternateVector {
        self.alt_vectors
            .lock()
            .get(first_key)
            .cloned()
            .unwrap_or_default()
    }

    fn notify_readers(&self, key: &CryptoKey, code: CallbackCode) {
        if let Some(waiters) = self.rww_waiters.lock().remove(key) {
            let notifier = evcore::ThreadId::allocate();
            for cont in waiters {
                if cont.mutex().try_lock(notifier) {
                    let event = Event::new(cont.clone(), code);
                    let _ = cont.handle(&event);
                    cont.mutex().unlock(notifier);
                } else {
                    warn!("RWW waiter's mutex contended on notify, dropping this wakeup");
                }
            }
        }
    }

    /// Aborts an in-flight write before it committed any fragment: readers
    /// attached via [`Stripe::attach_reader`] receive `VC_EOS`, not a Dir
    /// entry.
    pub fn abort_write(&self, key: &CryptoKey) {
        self.notify_readers(key, CacheEventCode::VcEos.into_callback_code());
    }

    /// Marks this stripe unusable after a hard I/O error surfaced through
    /// `diskaio`'s error-callback path ("stripe marked degraded").
    pub fn on_hard_io_error(&self) {
        self.mark_degraded();
    }

    /// Snapshots the current in-memory header ("cycle_serial"
    /// diagnostic reads this off a running server without blocking on I/O).
    pub fn header_snapshot(&self) -> StripeHeader {
        *self.header.lock()
    }

    /// Persists the header to its redundant footer locations at both ends
    /// of the stripe ("redundant footer"), bumping
    /// `sync_serial` so a reconcile on the next open prefers whichever copy
    /// lands last. Driven periodically by a caller-owned timer, not by any
    /// write path itself.
    pub fn sync_header(&self, continuation: Arc<dyn Continuation>) {
        let bytes = {
            let mut header = self.header.lock();
            header.sync_serial += 1;
            header.to_bytes()
        };
        let primary = AioRequest::write(self.fd.clone(), 0, bytes.to_vec());
        self.aio
            .submit(AioVec::single(primary, continuation.clone(), None));
        let footer_offset = self.data_offset + self.data_len;
        let secondary = AioRequest::write(self.fd.clone(), footer_offset, bytes.to_vec());
        self.aio.submit(AioVec::single(secondary, continuation, None));
    }
}
