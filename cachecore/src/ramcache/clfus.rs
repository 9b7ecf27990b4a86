use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;

use crate::key::CryptoKey;

use super::RamCache;

/// Admission-conditioned LFU-ish policy ("CLFUS"): entries earn
/// residency through repeated access rather than on first insertion,
/// approximating the original's clocked, frequency-sampled admission with
/// `moka`'s W-TinyLFU policy, which targets the same goal (protect the hot
/// working set from being flushed by a burst of one-shot scans).
pub struct ClfusRamCache {
    cache: Cache<CryptoKey, Vec<u8>>,
    capacity_bytes: u64,
    size_bytes: AtomicU64,
}

impl ClfusRamCache {
    pub fn new(capacity_bytes: u64) -> Self {
        let size_bytes = AtomicU64::new(0);
        let cache = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &CryptoKey, value: &Vec<u8>| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .build();
        Self {
            cache,
            capacity_bytes,
            size_bytes,
        }
    }
}

impl RamCache for ClfusRamCache {
    fn get(&self, key: &CryptoKey) -> Option<Vec<u8>> {
        self.cache.get(key)
    }

    fn put(&self, key: CryptoKey, bytes: Vec<u8>) {
        let new_len = bytes.len() as u64;
        let old_len = self.cache.get(&key).map(|v| v.len() as u64).unwrap_or(0);
        self.cache.insert(key, bytes);
        // moka evicts lazily on its own admission schedule; keep our own
        // running total in sync with what we *asked* it to hold so
        // `size_bytes` reflects intent even before moka's background
        // maintenance catches up. `run_pending_tasks` below reconciles any
        // drift from evictions that moka decided to perform.
        self.cache.run_pending_tasks();
        self.size_bytes.fetch_add(new_len, Ordering::Relaxed);
        if old_len > 0 {
            self.size_bytes.fetch_sub(old_len, Ordering::Relaxed);
        }
        self.size_bytes
            .store(self.cache.weighted_size(), Ordering::Relaxed);
    }

    fn remove(&self, key: &CryptoKey) {
        self.cache.invalidate(key);
        self.cache.run_pending_tasks();
        self.size_bytes
            .store(self.cache.weighted_size(), Ordering::Relaxed);
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}
