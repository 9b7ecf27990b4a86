use std::sync::Arc;

use evcore::Continuation;

use crate::dir::DirEntry;
use crate::doc::Doc;
use crate::error::Error;
use crate::key::CryptoKey;

use super::Stripe;

/// Re-admits a still-live Doc ahead of the aggregation buffer's write
/// cursor catching up to it ("evacuation"): the stripe is a
/// circular log, so a Doc the cursor is about to overwrite must be copied
/// forward or it is lost even though nothing has invalidated it.
///
/// Bounded by the stripe's [`super::agg::EvacuatorBudget`]: at most a
/// small, fixed number of evacuations run concurrently, so evacuation
/// traffic cannot itself become the backlog problem it exists to
/// relieve.
pub struct Evacuator;

impl Evacuator {
    /// Re-stages `doc` (read from its current location) into the
    /// aggregation buffer with the evacuator admission path: bound by the
    /// buffer's bare capacity (never the regular-write backlog headroom)
    /// and by the evacuator concurrency budget, surfacing backpressure as
    /// an error rather than ever being hard-rejected outright.
    pub fn evacuate(stripe: &Stripe, doc: &Doc) -> Result<(CryptoKey, DirEntry), Error> {
        let _guard = stripe
            .evac_budget
            .try_acquire()
            .ok_or(Error::EvacuationBudgetExhausted)?;

        let staged = stripe.stage_write(doc, true)?;
        let entry = DirEntry {
            offset: staged.offset,
            approx_size: doc.len as u32,
            tag: doc.key.tag(),
            phase: staged.phase,
            next: crate::dir::DIR_NIL,
        };
        Ok((doc.key, entry))
    }

    /// Flushes one evacuated Doc through to disk, notifying `completion`
    /// once the underlying `pwrite` lands ("aggWrite" shared with
    /// regular writes — evacuation does not get its own disk-write path).
    pub fn flush_one(stripe: &Stripe, key: CryptoKey, entry: DirEntry, completion: Arc<dyn Continuation>) {
        stripe.flush(vec![(key, entry)], completion);
    }
}
