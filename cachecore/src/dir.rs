use byteorder::{ByteOrder, LittleEndian as LE};

use crate::key::CryptoKey;

/// Wire size of one directory entry : `offset` (40 bits' worth
/// stored as u64 for simplicity), `approx_size`, `tag`, `phase`, `next`.
pub const DIR_ENTRY_LEN: usize = 8 + 4 + 2 + 1 + 4;

/// Index sentinel meaning "end of bucket chain" ("`next` links
/// within a bucket").
pub const DIR_NIL: u32 = u32::MAX;

/// One slot of a stripe's in-memory directory . Each live
/// object's Dir entry records where its Doc lives on disk and enough of
/// its key to disambiguate a bucket collision without reading the Doc
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Byte offset of the Doc within the stripe's data region.
    pub offset: u64,
    /// Doc's on-disk `len`, rounded to the same unit as `offset` — used to
    /// size a speculative read before the Doc header confirms the exact
    /// length.
    pub approx_size: u32,
    /// Low bits of the full key's second word ("collision tag").
    pub tag: u16,
    /// Write-phase bit ("the phase bit... flips each time the
    /// aggregation buffer wraps"); a stale entry's phase disagrees with the
    /// stripe's current phase and is treated as empty.
    pub phase: bool,
    /// Next entry in this bucket's chain, or [`DIR_NIL`].
    pub next: u32,
}

impl DirEntry {
    pub const EMPTY: DirEntry = DirEntry {
        offset: 0,
        approx_size: 0,
        tag: 0,
        phase: false,
        next: DIR_NIL,
    };

    pub fn is_empty(&self) -> bool {
        self.approx_size == 0 && self.offset == 0
    }

    pub fn to_bytes(&self) -> [u8; DIR_ENTRY_LEN] {
        let mut out = [0u8; DIR_ENTRY_LEN];
        LE::write_u64(&mut out[0..8], self.offset);
        LE::write_u32(&mut out[8..12], self.approx_size);
        LE::write_u16(&mut out[12..14], self.tag);
        out[14] = self.phase as u8;
        LE::write_u32(&mut out[15..19], self.next);
        out
    }

    pub fn from_bytes(bytes: &[u8; DIR_ENTRY_LEN]) -> Self {
        Self {
            offset: LE::read_u64(&bytes[0..8]),
            approx_size: LE::read_u32(&bytes[8..12]),
            tag: LE::read_u16(&bytes[12..14]),
            phase: bytes[14] != 0,
            next: LE::read_u32(&bytes[15..19]),
        }
    }
}

/// A stripe's in-memory directory: a fixed-size bucket hash table with
/// chaining via [`DirEntry::next`] ("Directory"). Bucket
/// index is derived from the key's low bits, independent of the vol hash
/// table's stripe routing (which uses the same word but a different mask
/// width).
pub struct Directory {
    entries: Vec<DirEntry>,
    n_buckets: usize,
    current_phase: bool,
}

impl Directory {
    /// `capacity` is the total entry count (buckets plus chain overflow
    /// segments); `n_buckets` must divide it evenly and should be a power
    /// of two.
    pub fn new(capacity: usize, n_buckets: usize) -> Self {
        assert!(n_buckets > 0 && n_buckets <= capacity);
        Self {
            entries: vec![DirEntry::EMPTY; capacity],
            n_buckets,
            current_phase: false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_phase(&self) -> bool {
        self.current_phase
    }

    /// Flips the phase bit stripe-wide : called once per
    /// aggregation-buffer wraparound. Entries written under the old phase
    /// become implicitly stale without being individually rewritten.
    pub fn flip_phase(&mut self) {
        self.current_phase = !self.current_phase;
    }

    fn bucket_of(&self, key: &CryptoKey) -> usize {
        (key.u64_0() as usize) & (self.n_buckets - 1)
    }

    /// Walks `key`'s bucket chain, returning the first entry whose tag
    /// matches and whose phase is current ("probe"). A phase
    /// mismatch is treated the same as "not found", not as an error.
    pub fn probe(&self, key: &CryptoKey) -> Option<DirEntry> {
        let tag = key.tag();
        let mut idx = self.bucket_of(key);
        let mut seen = 0usize;
        loop {
            let entry = self.entries[idx];
            if entry.is_empty() {
                return None;
            }
            if entry.tag == tag && entry.phase == self.current_phase {
                return Some(entry);
            }
            if entry.next == DIR_NIL {
                return None;
            }
            idx = entry.next as usize;
            seen += 1;
            if seen > self.entries.len() {
                // Chain cycle from on-disk corruption; fail closed rather
                // than spin.
                return None;
            }
        }
    }

    /// Inserts or replaces `key`'s entry. A matching tag already in the
    /// chain is overwritten in place (this is how an alternate replacement
    /// lands without growing the chain); otherwise a free overflow slot is
    /// appended to the bucket's chain ("insert").
    pub fn insert(&mut self, key: &CryptoKey, entry: DirEntry) -> Result<(), DirectoryFull> {
        let tag = key.tag();
        let head = self.bucket_of(key);

        let mut idx = head;
        loop {
            let cur = self.entries[idx];
            if cur.is_empty() {
                self.entries[idx] = DirEntry {
                    phase: self.current_phase,
                    next: DIR_NIL,
                    ..entry
                };
                return Ok(());
            }
            if cur.tag == tag {
                let next = cur.next;
                self.entries[idx] = DirEntry {
                    phase: self.current_phase,
                    next,
                    ..entry
                };
                return Ok(());
            }
            if cur.next == DIR_NIL {
                break;
            }
            idx = cur.next as usize;
        }

        match self.free_slot() {
            Some(free) => {
                self.entries[free] = DirEntry {
                    phase: self.current_phase,
                    next: DIR_NIL,
                    ..entry
                };
                self.entries[idx].next = free as u32;
                Ok(())
            }
            None => Err(DirectoryFull),
        }
    }

    /// Removes `key`'s entry from its bucket chain if present, used for
    /// direct deletion of a single alternate.
    pub fn remove(&mut self, key: &CryptoKey) -> bool {
        let tag = key.tag();
        let head = self.bucket_of(key);

        if self.entries[head].is_empty() {
            return false;
        }
        if self.entries[head].tag == tag {
            let next = self.entries[head].next;
            if next == DIR_NIL {
                self.entries[head] = DirEntry::EMPTY;
            } else {
                self.entries[head] = self.entries[next as usize];
                self.entries[next as usize] = DirEntry::EMPTY;
            }
            return true;
        }

        let mut prev = head;
        let mut idx = self.entries[head].next;
        while idx != DIR_NIL {
            let cur = self.entries[idx as usize];
            if cur.tag == tag {
                self.entries[prev].next = cur.next;
                self.entries[idx as usize] = DirEntry::EMPTY;
                return true;
            }
            prev = idx as usize;
            idx = cur.next;
        }
        false
    }

    /// First entry beyond the bucket-head region (`0..n_buckets` are
    /// reserved bucket heads, never used as free overflow slots) that is
    /// currently empty. Overflow slots are never reused by a different
    /// bucket while still chained, so this simple linear scan is safe;
    /// callers needing speed at scale would instead keep a free list, which
    /// is a reasonable future optimization and not required for
    /// correctness.
    fn free_slot(&self) -> Option<usize> {
        (self.n_buckets..self.entries.len()).find(|&i| self.entries[i].is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub struct DirectoryFull;

impl std::fmt::Display for DirectoryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "directory bucket chain exhausted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> CryptoKey {
        CryptoKey::from_bytes(seed, b"http://www.scw00.com/a/b/c")
    }

    #[test]
    fn insert_then_probe_round_trips() {
        let mut dir = Directory::new(64, 16);
        let k = key(0);
        let entry = DirEntry {
            offset: 4096,
            approx_size: 512,
            tag: k.tag(),
            phase: false,
            next: DIR_NIL,
        };
        dir.insert(&k, entry).unwrap();
        let found = dir.probe(&k).unwrap();
        assert_eq!(found.offset, 4096);
    }

    #[test]
    fn probe_miss_on_unseen_key() {
        let dir = Directory::new(64, 16);
        assert!(dir.probe(&key(0)).is_none());
    }

    #[test]
    fn remove_then_probe_misses() {
        let mut dir = Directory::new(64, 16);
        let k = key(0);
        dir.insert(
            &k,
            DirEntry {
                offset: 1,
                approx_size: 1,
                tag: k.tag(),
                phase: false,
                next: DIR_NIL,
            },
        )
        .unwrap();
        assert!(dir.remove(&k));
        assert!(dir.probe(&k).is_none());
    }

    #[test]
    fn phase_flip_hides_stale_entries() {
        let mut dir = Directory::new(64, 16);
        let k = key(0);
        dir.insert(
            &k,
            DirEntry {
                offset: 1,
                approx_size: 1,
                tag: k.tag(),
                phase: false,
                next: DIR_NIL,
            },
        )
        .unwrap();
        assert!(dir.probe(&k).is_some());
        dir.flip_phase();
        assert!(dir.probe(&k).is_none());
    }

    #[test]
    fn bucket_overflow_chains_across_multiple_keys() {
        let mut dir = Directory::new(4, 2);
        // Force collisions by constructing keys that share u64_0's low bit.
        for i in 0u8..2 {
            let k = CryptoKey::from_words(0, i as u64);
            dir.insert(
                &k,
                DirEntry {
                    offset: i as u64,
                    approx_size: 1,
                    tag: k.tag(),
                    phase: false,
                    next: DIR_NIL,
                },
            )
            .unwrap();
        }
        for i in 0u8..2 {
            let k = CryptoKey::from_words(0, i as u64);
            assert_eq!(dir.probe(&k).unwrap().offset, i as u64);
        }
    }

    #[test]
    fn directory_full_is_reported() {
        let mut dir = Directory::new(2, 2);
        let a = CryptoKey::from_words(0, 0);
        let b = CryptoKey::from_words(0, 1);
        dir.insert(
            &a,
            DirEntry {
                offset: 1,
                approx_size: 1,
                tag: a.tag(),
                phase: false,
                next: DIR_NIL,
            },
        )
        .unwrap();
        let err = dir.insert(
            &b,
            DirEntry {
                offset: 2,
                approx_size: 1,
                tag: b.tag(),
                phase: false,
                next: DIR_NIL,
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn entry_round_trips_through_bytes() {
        let e = DirEntry {
            offset: 123_456,
            approx_size: 789,
            tag: 0xBEEF,
            phase: true,
            next: 42,
        };
        assert_eq!(DirEntry::from_bytes(&e.to_bytes()), e);
    }
}
