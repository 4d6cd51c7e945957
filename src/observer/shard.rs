//! Sharded Map Implementation
//!
//! Lock-striped hashmap backing the interning table of a registry.
//!
//! # Design
//!
//! - Each shard has its own RwLock, so binds on different label sets rarely contend
//! - Power-of-2 shard count enables fast modulo via bitwise AND
//! - Cache-line padding between shards prevents false sharing
//! - Closures passed to the upsert/remove helpers run under the shard's write lock

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use super::CACHE_LINE_SIZE;

/// Single shard containing a hashmap and statistics
#[repr(C)]
pub struct Shard<K, V> {
    /// The hashmap for this shard
    map: RwLock<HashMap<K, V>>,
    /// Number of entries
    count: AtomicU64,
    /// Number of reads
    reads: AtomicU64,
    /// Number of writes
    writes: AtomicU64,
    /// Padding to prevent false sharing
    _padding: [u8; CACHE_LINE_SIZE - 24],
}

impl<K, V> Default for Shard<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Shard<K, V> {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - 24],
        }
    }

    /// Get the number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl<K: Eq + Hash, V> Shard<K, V> {
    /// Get a value from the shard
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let guard = self.map.read();
        guard.get(key).cloned()
    }

    /// Return the existing value or insert the one produced by `f`.
    ///
    /// The boolean is true when `f` ran. `f` runs at most once, under the
    /// write lock, so concurrent callers with equal keys observe one value.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        if let Some(v) = self.get(&key) {
            return (v, false);
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();

        // Double-check under write lock
        if let Some(v) = guard.get(&key) {
            return (v.clone(), false);
        }

        let value = f();
        guard.insert(key, value.clone());
        self.count.fetch_add(1, Ordering::Relaxed);
        (value, true)
    }

    /// Remove the entry for `key` only if `predicate` accepts its value
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.map.write();

        if !guard.get(key).map(predicate).unwrap_or(false) {
            return None;
        }

        let removed = guard.remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Get all entries (for iteration)
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = self.map.read();
        guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

/// Sharded map with a power-of-two shard count
pub struct ShardedMap<K, V, const N: usize = 16> {
    shards: Box<[Shard<K, V>]>,
}

impl<K, V, const N: usize> Default for ShardedMap<K, V, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    /// Create a new sharded map
    pub fn new() -> Self {
        debug_assert!(N.is_power_of_two(), "shard count must be a power of two");
        Self {
            shards: (0..N).map(|_| Shard::new()).collect(),
        }
    }

    /// Get total number of entries across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    pub fn total_reads(&self) -> u64 {
        self.shards.iter().map(|s| s.read_count()).sum()
    }

    pub fn total_writes(&self) -> u64 {
        self.shards.iter().map(|s| s.write_count()).sum()
    }
}

impl<K: Eq + Hash, V, const N: usize> ShardedMap<K, V, N> {
    #[inline]
    fn shard_for(&self, key: &K) -> &Shard<K, V> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & (N - 1)]
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.shard_for(key).get(key)
    }

    /// See [`Shard::get_or_insert_with`]
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> (V, bool)
    where
        V: Clone,
        F: FnOnce() -> V,
    {
        self.shard_for(&key).get_or_insert_with(key, f)
    }

    /// See [`Shard::remove_if`]
    pub fn remove_if<F>(&self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        self.shard_for(key).remove_if(key, predicate)
    }

    /// Snapshot of every entry; shards are read one at a time
    pub fn entries(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        self.shards.iter().flat_map(|s| s.entries()).collect()
    }
}

/// Statistics for a sharded map
#[derive(Debug, Clone)]
pub struct ShardedMapStats {
    pub total_entries: usize,
    pub total_reads: u64,
    pub total_writes: u64,
    /// Per-shard entry counts
    pub shard_entry_counts: Vec<usize>,
}

impl<K, V, const N: usize> ShardedMap<K, V, N> {
    pub fn stats(&self) -> ShardedMapStats {
        let shard_entry_counts: Vec<usize> = self.shards.iter().map(|s| s.len()).collect();

        ShardedMapStats {
            total_entries: shard_entry_counts.iter().sum(),
            total_reads: self.total_reads(),
            total_writes: self.total_writes(),
            shard_entry_counts,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
