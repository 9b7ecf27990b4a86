use std::collections::HashMap;

use parking_lot::Mutex;

use crate::key::CryptoKey;

use super::RamCache;

const NIL: usize = usize::MAX;

struct Node {
    key: CryptoKey,
    bytes: Vec<u8>,
    prev: usize,
    next: usize,
}

/// Doubly-linked-list LRU ("LRU"): a hit moves the entry to the
/// head; eviction trims from the tail until resident bytes are back under
/// budget. Nodes live in a slab rather than as boxed, pointer-linked
/// allocations, so the whole structure stays safe-Rust.
struct LruState {
    slab: Vec<Node>,
    free: Vec<usize>,
    index: HashMap<CryptoKey, usize>,
    head: usize,
    tail: usize,
    size_bytes: u64,
}

impl LruState {
    fn new() -> Self {
        Self {
            slab: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: NIL,
            tail: NIL,
            size_bytes: 0,
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

    fn evict_tail(&mut self) -> Option<CryptoKey> {
        if self.tail == NIL {
            return None;
        }
        let idx = self.tail;
        self.unlink(idx);
        let key = self.slab[idx].key;
        self.size_bytes -= self.slab[idx].bytes.len() as u64;
        self.slab[idx].bytes = Vec::new();
        self.index.remove(&key);
        self.free.push(idx);
        Some(key)
    }
}

pub struct LruRamCache {
    state: Mutex<LruState>,
    capacity_bytes: u64,
}

impl LruRamCache {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            state: Mutex::new(LruState::new()),
            capacity_bytes,
        }
    }
}

impl RamCache for LruRamCache {
    fn get(&self, key: &CryptoKey) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let idx = *state.index.get(key)?;
        state.unlink(idx);
        state.push_front(idx);
        Some(state.slab[idx].bytes.clone())
    }

    fn put(&self, key: CryptoKey, bytes: Vec<u8>) {
        let mut state = self.state.lock();
        let incoming_len = bytes.len() as u64;

        if let Some(&idx) = state.index.get(&key) {
            state.size_bytes -= state.slab[idx].bytes.len() as u64;
            state.slab[idx].bytes = bytes;
            state.size_bytes += incoming_len;
            state.unlink(idx);
            state.push_front(idx);
        } else {
            let idx = match state.free.pop() {
                Some(i) => {
                    state.slab[i] = Node {
                        key,
                        bytes,
                        prev: NIL,
                        next: NIL,
                    };
                    i
                }
                None => {
                    state.slab.push(Node {
                        key,
                        bytes,
                        prev: NIL,
                        next: NIL,
                    });
                    state.slab.len() - 1
                }
            };
            state.index.insert(key, idx);
            state.size_bytes += incoming_len;
            state.push_front(idx);
        }

        while state.size_bytes > self.capacity_bytes {
            if state.evict_tail().is_none() {
                break;
            }
        }
    }

    fn remove(&self, key: &CryptoKey) {
        let mut state = self.state.lock();
        if let Some(idx) = state.index.remove(key) {
            state.unlink(idx);
            state.size_bytes -= state.slab[idx].bytes.len() as u64;
            state.slab[idx].bytes = Vec::new();
            state.free.push(idx);
        }
    }

    fn size_bytes(&self) -> u64 {
        self.state.lock().size_bytes
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
        let c = LruRamCache::new(1024);
        c.put(key(0), vec![1, 2, 3]);
        assert_eq!(c.get(&key(0)), Some(vec![1, 2, 3]));
    }

    #[test]
    fn eviction_respects_byte_budget() {
        let c = LruRamCache::new(10);
        c.put(key(0), vec![0u8; 6]);
        c.put(key(1), vec![0u8; 6]);
        assert!(c.size_bytes() <= 10);
        // oldest entry should have been evicted to make room
        assert!(c.get(&key(0)).is_none() || c.get(&key(1)).is_some());
    }

    #[test]
    fn access_promotes_entry_ahead_of_eviction() {
        let c = LruRamCache::new(12);
        c.put(key(0), vec![0u8; 6]);
        c.put(key(1), vec![0u8; 6]);
        c.get(&key(0)); // promote key 0 to the head
        c.put(key(2), vec![0u8; 6]); // forces an eviction
        assert!(c.get(&key(0)).is_some());
        assert!(c.get(&key(1)).is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let c = LruRamCache::new(1024);
        c.put(key(0), vec![1]);
        c.remove(&key(0));
        assert!(c.get(&key(0)).is_none());
        assert_eq!(c.size_bytes(), 0);
    }
}
