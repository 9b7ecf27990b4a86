use parking_lot::RwLock;

use evcore::ThreadId;

/// An array of independently-locked partitions of `T`, selected either by
/// an explicit shard index or by the calling thread's id. A single global
/// lock guarding a read-mostly structure becomes a point of cacheline
/// contention once enough `EThread` workers hit it concurrently, even
/// when none of them actually conflict on the data. Splitting one lock
/// into several, chosen by a cheap key derived from the caller, spreads
/// that contention out.
pub struct ShardedRwLock<T> {
    shards: Vec<RwLock<T>>,
}

impl<T> ShardedRwLock<T> {
    pub fn new(n_shards: usize, mut make: impl FnMut(usize) -> T) -> Self {
        let n_shards = n_shards.max(1);
        let shards = (0..n_shards).map(&mut make).collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_index_for_thread(&self, thread: ThreadId) -> usize {
        thread.0 % self.shards.len()
    }

    pub fn shard_index_for_key(&self, key: u64) -> usize {
        (key as usize) % self.shards.len()
    }

    pub fn read_shard(&self, index: usize) -> parking_lot::RwLockReadGuard<'_, T> {
        self.shards[index % self.shards.len()].read()
    }

    pub fn write_shard(&self, index: usize) -> parking_lot::RwLockWriteGuard<'_, T> {
        self.shards[index % self.shards.len()].write()
    }
}
