use std::sync::Arc;

use evcore::{Action, Continuation, Event, ThreadId};
use log::error;

use crate::event::CacheEventCode;
use crate::key::CryptoKey;
use crate::stripe::Stripe;
use crate::vc::{CacheVC, VcFlags, VcOp};

/// Number of vol hash table slots; fixed at 1024 independent of the
/// actual stripe count, so resizing a stripe's relative weight only
/// requires rebuilding this table, not repartitioning stored data.
pub const VOL_HASH_TABLE_SIZE: usize = 1024;

/// Maps stripes to vol hash table slots by their relative byte length
/// (the "stable hashing" property: growing one of several stripes by
/// roughly X% should migrate roughly X% of the key-space to it, not
/// reshuffle the whole table). Builds a table where slot `i`
/// points at the stripe whose cumulative weight bracket contains `i`.
fn build_vol_hash_table(weights: &[u64]) -> Vec<usize> {
    let total: u64 = weights.iter().sum();
    assert!(total > 0, "at least one stripe must have nonzero length");
    let mut table = Vec::with_capacity(VOL_HASH_TABLE_SIZE);
    let mut cumulative = vec![0u64; weights.len() + 1];
    for (i, w) in weights.iter().enumerate() {
        cumulative[i + 1] = cumulative[i] + w;
    }
    for slot in 0..VOL_HASH_TABLE_SIZE {
        let point = (slot as u64 * total) / VOL_HASH_TABLE_SIZE as u64;
        let stripe_idx = cumulative
            .windows(2)
            .position(|w| point >= w[0] && point < w[1])
            .unwrap_or(weights.len() - 1);
        table.push(stripe_idx);
    }
    table
}

/// Owns every stripe in the cache and routes keys to one of them. The
/// public surface mirrors the rest of this
/// codebase's continuation-based API: every operation returns an
/// [`Action`] immediately and the result arrives as an event on the
/// caller's continuation.
pub struct CacheProcessor {
    stripes: Vec<Arc<Stripe>>,
    vol_hash_table: Vec<usize>,
}

impl CacheProcessor {
    pub fn new(stripes: Vec<Arc<Stripe>>) -> Self {
        let weights: Vec<u64> = stripes.iter().map(|_| 1u64).collect();
        let vol_hash_table = build_vol_hash_table(&weights);
        Self {
            stripes,
            vol_hash_table,
        }
    }

    /// Builds the processor with explicit per-stripe weights (typically
    /// each stripe's byte length), used when stripes differ in size and
    /// the vol hash table should route proportionally more keys to larger
    /// ones.
    pub fn with_weights(stripes: Vec<Arc<Stripe>>, weights: Vec<u64>) -> Self {
        assert_eq!(stripes.len(), weights.len());
        let vol_hash_table = build_vol_hash_table(&weights);
        Self {
            stripes,
            vol_hash_table,
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn route(&self, key: &CryptoKey) -> Option<Arc<Stripe>> {
        let slot = (key.u64_0() as usize) & (VOL_HASH_TABLE_SIZE - 1);
        let stripe_idx = self.vol_hash_table[slot];
        self.stripes.get(stripe_idx).cloned()
    }

    /// Opens a read against `key` ("open_read"). Fires
    /// `OpenReadFailed` on `continuation` immediately if the routed
    /// stripe is offline; otherwise delegates to the `CacheVC`, which may
    /// itself report a hit, a miss-as-RWW-attach, or (once the VC drives
    /// further I/O) a later read-complete event.
    pub fn open_read(
        &self,
        continuation: Arc<dyn Continuation>,
        key: CryptoKey,
        request_digest: u64,
    ) -> Action {
        match self.route(&key) {
            Some(stripe) if !stripe.is_degraded() => {
                let vc = CacheVC::new(VcOp::Read, key, VcFlags::default(), stripe);
                let code = vc.open_read(request_digest, continuation.clone());
                fire(continuation, code)
            }
            _ => fire(continuation, CacheEventCode::OpenReadFailed),
        }
    }

    /// Opens a write against `key` ("open_write"). Returns the
    /// new `CacheVC` via the fired event's continuation having been given
    /// the VC out of band is not modeled here — callers that need the VC
    /// itself should use [`CacheProcessor::open_write_vc`], which this
    /// wraps.
    pub fn open_write(&self, continuation: Arc<dyn Continuation>, key: CryptoKey) -> Action {
        match self.open_write_vc(key) {
            Some(_vc) => fire(continuation, CacheEventCode::OpenWriteSuccess),
            None => fire(continuation, CacheEventCode::OpenWriteFailed),
        }
    }

    /// Same as [`CacheProcessor::open_read`] but returns the `CacheVC`
    /// directly, for callers driving `begin_read`/`finish_read` themselves
    /// rather than going through a second continuation hop.
    pub fn open_read_vc(&self, key: CryptoKey) -> Option<Arc<CacheVC>> {
        let stripe = self.route(&key)?;
        if stripe.is_degraded() {
            return None;
        }
        Some(CacheVC::new(VcOp::Read, key, VcFlags::default(), stripe))
    }

    /// Same as [`CacheProcessor::open_write`] but returns the `CacheVC`
    /// directly, for callers driving `do_io_write`/`do_io_close`
    /// themselves rather than going through a second continuation hop.
    pub fn open_write_vc(&self, key: CryptoKey) -> Option<Arc<CacheVC>> {
        let stripe = self.route(&key)?;
        if stripe.is_degraded() {
            return None;
        }
        Some(CacheVC::new(VcOp::Write, key, VcFlags::default(), stripe))
    }
}

/// Dispatches `code` to `continuation` synchronously on the calling thread
/// and returns the (already-resolved) [`Action`] handle, matching the
/// rest of this codebase's "every operation returns an Action" API shape
/// even for results that are known immediately. Mirrors `diskaio`'s
/// `LocalDispatch` helper for the same reason: no other thread has any
/// reason to hold this particular continuation's mutex at this instant,
/// so a failed `try_lock` indicates a caller bug, not contention to
/// retry on.
fn fire(continuation: Arc<dyn Continuation>, code: CacheEventCode) -> Action {
    let event = Event::new(continuation.clone(), code.into_callback_code());
    let action = event.action();
    let thread = ThreadId::allocate();
    if continuation.mutex().try_lock(thread) {
        let _ = continuation.handle(&event);
        continuation.mutex().unlock(thread);
    } else {
        error!("cache completion continuation's mutex was held by another thread");
    }
    action
}
