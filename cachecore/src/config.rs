use serde::Deserialize;

/// The recognised configuration keys , held as a plain
/// deserializable struct rather than loaded from a file — config-file
/// loading is out of scope for this crate; `cacheserver` populates one of
/// these straight from its `clap` arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub threads_per_disk: usize,
    pub target_fragment_size: usize,
    pub ram_cache_algorithm: RamCacheAlgorithm,
    pub ram_cache_size: u64,
    pub enable_checksum: bool,
    pub agg_write_backlog: usize,
    pub thread_stacksize: usize,
    pub freelist_high_watermark: usize,
    pub freelist_low_watermark: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RamCacheAlgorithm {
    Lru,
    Clfus,
    /// Key-partitioned LRU ("scalable reader-writer lock keyed by
    /// per-thread id"): trades exact global LRU ordering for partitions
    /// that don't contend with each other under concurrent access.
    ShardedLru,
}

impl Default for RamCacheAlgorithm {
    fn default() -> Self {
        RamCacheAlgorithm::Clfus
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads_per_disk: 2,
            target_fragment_size: 1 << 20,
            ram_cache_algorithm: RamCacheAlgorithm::default(),
            ram_cache_size: 64 << 20,
            enable_checksum: true,
            agg_write_backlog: 5 << 20,
            thread_stacksize: 1 << 20,
            freelist_high_watermark: 1024,
            freelist_low_watermark: 256,
        }
    }
}
