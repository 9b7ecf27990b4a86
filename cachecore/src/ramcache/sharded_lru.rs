use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::concurrency::ShardedRwLock;
use crate::key::CryptoKey;

use super::RamCache;

const NIL: usize = usize::MAX;

struct Node {
    key: CryptoKey,
    bytes: Vec<u8>,
    prev: usize,
    next: usize,
}

struct Partition {
    slab: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<CryptoKey, usize>,
    head: usize,
    tail: usize,
    size_bytes: u64,
    capacity_bytes: u64,
}

impl Partition {
    fn new(capacity_bytes: u64) -> Self {
        Self {
            slab: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            size_bytes: 0,
            capacity_bytes,
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slab[idx].prev, self.slab[idx].next);
        if prev != NIL {
            self.slab[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.slab[next].prev = prev;
        } else {
            self.tail = prev;
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.slab[idx].prev = NIL;
        self.slab[idx].next = self.head;
        if self.head != NIL {
            self.slab[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn evict_tail(&mut self) -> bool {
        if self.tail == NIL {
            return false;
        }
        let idx = self.tail;
        self.unlink(idx);
        let key = self.slab[idx].key;
        self.size_bytes -= self.slab[idx].bytes.len() as u64;
        self.slab[idx].bytes = Vec::new();
        self.index.remove(&key);
        self.free.push(idx);
        true
    }

    fn get(&mut self, key: &CryptoKey) -> Option<Vec<u8>> {
        let idx = *self.index.get(key)?;
        self.unlink(idx);
        self.push_front(idx);
        Some(self.slab[idx].bytes.clone())
    }

    fn put(&mut self, key: CryptoKey, bytes: Vec<u8>) {
        let incoming_len = bytes.len() as u64;
        if let Some(&idx) = self.index.get(&key) {
            self.size_bytes -= self.slab[idx].bytes.len() as u64;
            self.slab[idx].bytes = bytes;
            self.size_bytes += incoming_len;
            self.unlink(idx);
            self.push_front(idx);
        } else {
            let idx = match self.free.pop() {
                Some(i) => {
                    self.slab[i] = Node { key, bytes, prev: NIL, next: NIL };
                    i
                }
                None => {
                    self.slab.push(Node { key, bytes, prev: NIL, next: NIL });
                    self.slab.len() - 1
                }
            };
            self.index.insert(key, idx);
            self.size_bytes += incoming_len;
            self.push_front(idx);
        }
        while self.size_bytes > self.capacity_bytes {
            if !self.evict_tail() {
                break;
            }
        }
    }

    fn remove(&mut self, key: &CryptoKey) {
        if let Some(idx) = self.index.remove(key) {
            self.unlink(idx);
            self.size_bytes -= self.slab[idx].bytes.len() as u64;
            self.slab[idx].bytes = Vec::new();
            self.free.push(idx);
        }
    }
}

/// A key-partitioned LRU ("RAM cache"): `n_shards`
/// independent LRU partitions, each with its own slice of the byte budget,
/// so a hit against one partition never contends with a hit against
/// another. Approximates one global LRU rather than implementing it
/// exactly — the usual tradeoff this kind of sharding makes, traded for
/// not serializing every concurrent reader behind one mutex (see
/// [`ShardedRwLock`]).
pub struct ShardedLruRamCache {
    partitions: ShardedRwLock<Partition>,
    capacity_bytes: u64,
    size_bytes: AtomicU64,
}

impl ShardedLruRamCache {
    pub fn new(capacity_bytes: u64, n_shards: usize) -> Self {
        let per_shard = capacity_bytes / n_shards.max(1) as u64;
        Self {
            partitions: ShardedRwLock::new(n_shards, |_| Partition::new(per_shard)),
            capacity_bytes,
            size_bytes: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &CryptoKey) -> usize {
        self.partitions.shard_index_for_key(key.u64_0())
    }
}

impl RamCache for ShardedLruRamCache {
    fn get(&self, key: &CryptoKey) -> Option<Vec<u8>> {
        let shard = self.shard_for(key);
        self.partitions.write_shard(shard).get(key)
    }

    fn put(&self, key: CryptoKey, bytes: Vec<u8>) {
        let shard = self.shard_for(&key);
        let incoming_len = bytes.len() as u64;
        let mut partition = self.partitions.write_shard(shard);
        let before = partition.size_bytes;
        partition.put(key, bytes);
        let after = partition.size_bytes;
        drop(partition);
        if after >= before {
            self.size_bytes.fetch_add(after - before, Ordering::Relaxed);
        } else {
            self.size_bytes.fetch_sub(before - after, Ordering::Relaxed);
        }
        let _ = incoming_len;
    }

    fn remove(&self, key: &CryptoKey) {
        let shard = self.shard_for(key);
        let mut partition = self.partitions.write_shard(shard);
        let before = partition.size_bytes;
        partition.remove(key);
        let after = partition.size_bytes;
        drop(partition);
        self.size_bytes.fetch_sub(before - after, Ordering::Relaxed);
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::Relaxed)
    }

    fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> CryptoKey {
        CryptoKey::from_bytes(seed, b"k")
    }

    #[test]
    fn put_then_get_round_trips() {
        let c = ShardedLruRamCache::new(4096, 4);
        c.put(key(0), vec![1, 2, 3]);
        assert_eq!(c.get(&key(0)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn total_size_tracks_across_shards() {
        let c = ShardedLruRamCache::new(4096, 4);
        for i in 0..8u8 {
            c.put(key(i), vec![0u8; 16]);
        }
        assert_eq!(c.size_bytes(), 8 * 16);
    }

    #[test]
    fn eviction_respects_per_shard_budget() {
        let c = ShardedLruRamCache::new(32, 2); // 16 bytes per shard
        for i in 0..20u8 {
            c.put(key(i), vec![0u8; 6]);
        }
        assert!(c.size_bytes() <= 32);
    }
}
