use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::Error;

/// Outcome of an admission attempt that wasn't an outright rejection: the
/// buffer has no room for this write right now, but would once flushed.
/// The caller is expected to trigger a flush and retry, rather than
/// treating backpressure as a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedsFlush;

/// Largest a single Doc fragment (fixed header + header payload + body) may
/// be before it can never land in one aggregation cycle, independent of how
/// much the buffer is configured to hold.
pub const MAX_FRAG_SIZE: usize = 1 << 20;

struct Inner {
    buf: Vec<u8>,
}

/// The in-memory staging area a stripe fills before issuing one `pwrite`
/// per aggregation cycle. Admission applies three precedence-ordered
/// rules on every `add_writer` call:
///
/// 1. a Doc that could never fit even in an empty buffer is rejected
///    outright — no amount of flushing helps.
/// 2. a regular (non-evacuator) write is rejected once the buffer already
///    holds `capacity + backlog_bytes` worth of pending writes, the hard
///    ceiling on how much one stripe may buffer ahead of a flush.
/// 3. an evacuator-sourced write bypasses rule 2's backlog allowance
///    entirely (evacuation must make progress even while the stripe is
///    under write pressure) but is still bound by the buffer's bare
///    `capacity`, surfaced as [`NeedsFlush`] rather than a hard error —
///    evacuators are never rejected outright, only asked to wait for a
///    flush.
pub struct AggregationBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    backlog_bytes: usize,
}

impl AggregationBuffer {
    pub fn new(capacity: usize, backlog_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: Vec::with_capacity(capacity),
            }),
            capacity,
            backlog_bytes,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempts to stage `doc_bytes`. On success returns the byte offset
    /// within the (not yet flushed) buffer the Doc landed at, which the
    /// caller combines with the stripe's current `write_pos` to form the
    /// Dir entry's final on-disk offset.
    pub fn add_writer(&self, doc_bytes: &[u8], is_evacuator: bool) -> Result<usize, AggAdmission> {
        if doc_bytes.len() > self.capacity {
            return Err(AggAdmission::Rejected(Error::AggregationOverBudget {
                requested: doc_bytes.len(),
            }));
        }

        let mut inner = self.inner.lock();

        if is_evacuator {
            if inner.buf.len() + doc_bytes.len() > self.capacity {
                return Err(AggAdmission::NeedsFlush);
            }
        } else if inner.buf.len() + doc_bytes.len() > self.capacity + self.backlog_bytes {
            return Err(AggAdmission::Rejected(Error::AggregationOverBudget {
                requested: doc_bytes.len(),
            }));
        }

        let offset = inner.buf.len();
        inner.buf.extend_from_slice(doc_bytes);
        Ok(offset)
    }

    /// Drains the buffer's bytes for writing to disk, returning them.
    /// Called by the stripe's aggregation-write path once it decides to
    /// flush (on a timer, on explicit backpressure, or because
    /// `add_writer` returned [`NeedsFlush`]).
    pub fn drain(&self) -> Vec<u8> {
        let mut inner = self.inner.lock();
        std::mem::replace(&mut inner.buf, Vec::with_capacity(self.capacity))
    }

    pub fn pending_bytes(&self) -> usize {
        self.inner.lock().buf.len()
    }
}

/// Result of a rejected or deferred `add_writer` call.
#[derive(Debug)]
pub enum AggAdmission {
    Rejected(Error),
    NeedsFlush,
}

/// Caps how many evacuators may be mid-flight at once across a stripe:
/// evacuation shouldn't itself flood the aggregation buffer it's trying
/// to relieve pressure on.
pub struct EvacuatorBudget {
    in_flight: AtomicUsize,
    cap: usize,
}

impl EvacuatorBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            cap,
        }
    }

    /// Reserves a slot if one is free, returning a guard that releases it
    /// on drop.
    pub fn try_acquire(&self) -> Option<EvacuatorGuard<'_>> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.cap {
                return None;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(EvacuatorGuard { budget: self }),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

pub struct EvacuatorGuard<'a> {
    budget: &'a EvacuatorBudget,
}

impl Drop for EvacuatorGuard<'_> {
    fn drop(&mut self) {
        self.budget.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_write_is_rejected_regardless_of_capacity() {
        let agg = AggregationBuffer::new(16, 4);
        let err = agg.add_writer(&[0u8; 32], false);
        assert!(matches!(err, Err(AggAdmission::Rejected(_))));
    }

    #[test]
    fn regular_write_accepted_exactly_at_capacity_plus_backlog_boundary() {
        let agg = AggregationBuffer::new(8, 8);
        agg.add_writer(&[0u8; 8], false).unwrap();
        let second = agg.add_writer(&[0u8; 8], false);
        assert!(second.is_ok(), "capacity + backlog_bytes == 16 must admit a 16-byte total");
        assert_eq!(agg.pending_bytes(), 16);
    }

    #[test]
    fn regular_write_rejected_one_byte_past_capacity_plus_backlog_boundary() {
        let agg = AggregationBuffer::new(8, 8);
        agg.add_writer(&[0u8; 8], false).unwrap();
        let second = agg.add_writer(&[0u8; 9], false);
        assert!(matches!(second, Err(AggAdmission::Rejected(_))));
    }

    #[test]
    fn evacuator_signals_needs_flush_then_succeeds_after_drain() {
        let agg = AggregationBuffer::new(8, 100);
        agg.add_writer(&[0u8; 8], false).unwrap();
        let evac = agg.add_writer(&[0u8; 4], true);
        assert!(
            matches!(evac, Err(AggAdmission::NeedsFlush)),
            "an evacuator write is bound by bare capacity, not the backlog allowance"
        );
        let drained = agg.drain();
        assert_eq!(drained.len(), 8);
        assert_eq!(agg.pending_bytes(), 0);
        assert!(agg.add_writer(&[0u8; 4], true).is_ok());
    }

    #[test]
    fn evacuator_budget_enforces_concurrency_cap() {
        let budget = EvacuatorBudget::new(2);
        let a = budget.try_acquire().unwrap();
        let b = budget.try_acquire().unwrap();
        assert!(budget.try_acquire().is_none());
        drop(a);
        assert!(budget.try_acquire().is_some());
        drop(b);
    }
}
