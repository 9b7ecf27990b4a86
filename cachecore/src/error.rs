/// Error surface for cache operations. Transient I/O errors never reach
/// this type — `diskaio` retries them internally. Everything here is
/// either a hard I/O failure bubbled up from a stripe's error-callback
/// path, or a logical condition the cache itself detects (bad magic,
/// checksum mismatch, directory exhaustion, writer abort).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A disk reported a hard (non-transient) I/O error; the stripe on
    /// that disk is taken offline and the error is surfaced to the
    /// client as `VC_ERROR`.
    StripeIo(#[from] std::io::Error),

    /// Doc magic absent or mismatched where a live record was expected;
    /// treated as a miss, not a hard error.
    BadRecord { offset: u64 },

    /// Checksum recorded in a Doc does not match its recomputed value;
    /// same miss treatment as a bad magic.
    ChecksumMismatch { offset: u64, tag: u16 },

    /// An aggregation-buffer write would exceed the buffer's remaining
    /// budget (precedence rule 1).
    AggregationOverBudget { requested: usize },

    /// A Doc's header payload alone is large enough that the fragment could
    /// never fit within `MAX_FRAG_SIZE`, independent of the aggregation
    /// buffer's own capacity.
    FragmentHeaderTooLarge { header_len: usize },

    /// The writer closed or aborted before any fragment was committed;
    /// read-while-write readers attached to it receive `VC_EOS` rather
    /// than this error directly, but the writer's own completion surfaces
    /// it.
    WriterAborted,

    /// A stripe's directory has no free overflow slot left in the bucket
    /// chain an insert targeted, and an eviction attempt also failed to
    /// free one: surfaced to the writer as `OPEN_WRITE_FAILED`.
    DirectoryFull(#[from] crate::dir::DirectoryFull),

    /// The stripe identified by a key's routed index is offline (every
    /// disk holding it failed initialization or was degraded at runtime).
    StripeUnavailable { index: usize },

    /// All evacuator slots for a stripe are in use; evacuation backs off
    /// rather than contending further for disk bandwidth.
    EvacuationBudgetExhausted,

    /// The object was not found in any stripe (a clean cache miss, not a
    /// fault condition — exposed as `Err` here only because open_read's
    /// caller distinguishes "miss" from "hit" through the Action's
    /// callback code in practice; this variant exists for code paths that
    /// need a `Result` rather than an event code).
    Miss,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
