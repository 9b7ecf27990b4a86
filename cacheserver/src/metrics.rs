use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};

pub static CACHE_HITS: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("cache_hits", "Number of cache read hits").unwrap());

pub static CACHE_MISSES: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("cache_misses", "Number of cache read misses").unwrap());

pub static CACHE_RWW_ATTACHES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "cache_rww_attaches",
        "Number of reads that attached to an in-flight write"
    )
    .unwrap()
});

pub static CACHE_WRITES: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("cache_writes", "Number of cache writes committed").unwrap());

pub static CACHE_WRITE_ABORTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("cache_write_aborts", "Number of cache writes aborted").unwrap()
});

pub static STRIPES_DEGRADED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "cache_stripes_degraded",
        "Number of stripes currently offline after a hard I/O error"
    )
    .unwrap()
});

/// Tracks the last-synced stripe's `cycle_serial` — how many times its
/// data region has wrapped since the stripe was initialized.
pub static CYCLE_SERIAL: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "cache_cycle_serial",
        "cycle_serial of the most recently synced stripe header"
    )
    .unwrap()
});
