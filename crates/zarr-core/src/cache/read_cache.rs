//! Sharded, byte-bounded LRU cache of encoded chunks and metadata documents.
//!
//! ## Sharding
//!
//! Keys are spread over independently locked shards by hash, so concurrent
//! requests for different keys rarely contend. The byte budget is split
//! evenly; each shard evicts its own least-recently-used entries and an
//! entry larger than a shard's budget is never stored.
//!
//! ## Generations
//!
//! Every image carries a generation that `invalidate` advances for the
//! images it matches. Producers read the generation before resolving any
//! image metadata and insert with `put_if_current`, which refuses the insert
//! if that image was invalidated in the meantime. Invalidating one image
//! leaves work for every other image untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use lru::LruCache;
use pixel_store::ImageId;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::shard_index;
use crate::types::{CacheStats, NDIM};

/// What a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Encoded chunk bytes.
    Chunk { level: usize, coords: [u64; NDIM] },
    /// `.zarray` of one level.
    ArrayMetadata { level: usize },
    /// `.zgroup` of the image.
    GroupMetadata,
    /// `.zattrs` of the image.
    Attributes,
}

/// Read cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub image_id: ImageId,
    pub kind: EntryKind,
}

impl CacheKey {
    pub fn chunk(image_id: ImageId, level: usize, coords: [u64; NDIM]) -> Self {
        Self {
            image_id,
            kind: EntryKind::Chunk { level, coords },
        }
    }

    pub fn array_metadata(image_id: ImageId, level: usize) -> Self {
        Self {
            image_id,
            kind: EntryKind::ArrayMetadata { level },
        }
    }

    pub fn group_metadata(image_id: ImageId) -> Self {
        Self {
            image_id,
            kind: EntryKind::GroupMetadata,
        }
    }

    pub fn attributes(image_id: ImageId) -> Self {
        Self {
            image_id,
            kind: EntryKind::Attributes,
        }
    }

    /// Whether the key addresses chunk data.
    pub fn is_chunk(&self) -> bool {
        matches!(self.kind, EntryKind::Chunk { .. })
    }
}

struct Shard {
    entries: LruCache<CacheKey, Bytes>,
    size_bytes: u64,
}

/// Byte-bounded LRU read cache.
pub struct ReadCache {
    shards: Vec<Mutex<Shard>>,
    shard_capacity: u64,
    capacity: u64,
    /// Generation of every image a producer has asked about.
    generations: StdMutex<HashMap<ImageId, u64>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl ReadCache {
    /// Create a cache holding at most `capacity_bytes`, split over `shards`.
    pub fn new(capacity_bytes: usize, shards: usize) -> Self {
        let shard_count = shards.max(1);
        let capacity = capacity_bytes as u64;
        Self {
            shards: (0..shard_count)
                .map(|_| {
                    Mutex::new(Shard {
                        entries: LruCache::unbounded(),
                        size_bytes: 0,
                    })
                })
                .collect(),
            shard_capacity: capacity / shard_count as u64,
            capacity,
            generations: StdMutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<Shard> {
        &self.shards[shard_index(key, self.shards.len())]
    }

    /// Look up an entry, marking it most recently used.
    pub async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let mut shard = self.shard(key).lock().await;
        match shard.entries.get(key) {
            Some(bytes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up an entry without touching recency or statistics.
    pub async fn peek(&self, key: &CacheKey) -> Option<Bytes> {
        self.shard(key).lock().await.entries.peek(key).cloned()
    }

    fn generations(&self) -> std::sync::MutexGuard<'_, HashMap<ImageId, u64>> {
        // plain counters, consistent even if a holder panicked
        self.generations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current generation of an image.
    ///
    /// Read this before resolving descriptors or reading pixels, and hand it
    /// to `put_if_current` with the result.
    pub fn generation(&self, image_id: ImageId) -> u64 {
        *self.generations().entry(image_id).or_insert(0)
    }

    /// Insert an entry unconditionally. Returns whether it was stored.
    pub async fn put(&self, key: CacheKey, bytes: Bytes) -> bool {
        let mut shard = self.shard(&key).lock().await;
        self.insert_locked(&mut shard, key, bytes)
    }

    /// Insert an entry only if its image was not invalidated since
    /// `generation` was read.
    ///
    /// Returns whether the entry was stored.
    pub async fn put_if_current(&self, key: CacheKey, bytes: Bytes, generation: u64) -> bool {
        let mut shard = self.shard(&key).lock().await;
        let current = self
            .generations()
            .get(&key.image_id)
            .copied()
            .unwrap_or(0);
        if current != generation {
            debug!(?key, generation, current, "Discarding stale cache insert");
            return false;
        }
        self.insert_locked(&mut shard, key, bytes)
    }

    fn insert_locked(&self, shard: &mut Shard, key: CacheKey, bytes: Bytes) -> bool {
        let len = bytes.len() as u64;
        if len > self.shard_capacity {
            debug!(?key, bytes = len, "Entry exceeds shard budget, not cached");
            return false;
        }

        if let Some(previous) = shard.entries.pop(&key) {
            shard.size_bytes -= previous.len() as u64;
        }

        let mut evicted = 0u64;
        while shard.size_bytes + len > self.shard_capacity {
            match shard.entries.pop_lru() {
                Some((_, old)) => {
                    shard.size_bytes -= old.len() as u64;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(entries_evicted = evicted, "Read cache shard eviction");
        }

        shard.entries.put(key, bytes);
        shard.size_bytes += len;
        true
    }

    /// Remove every entry whose image matches `predicate`.
    ///
    /// Advances the generation of every matching image first, so that work
    /// started before this call cannot repopulate the cache. Returns the
    /// number of entries removed.
    pub async fn invalidate<F>(&self, predicate: F) -> usize
    where
        F: Fn(ImageId) -> bool,
    {
        let advanced = {
            let mut generations = self.generations();
            let mut advanced = 0usize;
            for (image_id, generation) in generations.iter_mut() {
                if predicate(*image_id) {
                    *generation += 1;
                    advanced += 1;
                }
            }
            advanced
        };

        let mut removed = 0usize;
        for shard in &self.shards {
            let mut shard = shard.lock().await;

            let doomed: Vec<CacheKey> = shard
                .entries
                .iter()
                .filter(|(key, _)| predicate(key.image_id))
                .map(|(key, _)| *key)
                .collect();
            for key in doomed {
                if let Some(bytes) = shard.entries.pop(&key) {
                    shard.size_bytes -= bytes.len() as u64;
                    removed += 1;
                }
            }
        }

        self.invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        info!(
            entries_removed = removed,
            images_advanced = advanced,
            "Read cache invalidation completed"
        );
        removed
    }

    /// Remove every entry.
    pub async fn clear(&self) -> usize {
        self.invalidate(|_| true).await
    }

    /// Snapshot of cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let mut entries = 0usize;
        let mut memory_bytes = 0u64;
        for shard in &self.shards {
            let shard = shard.lock().await;
            entries += shard.entries.len();
            memory_bytes += shard.size_bytes;
        }

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries,
            memory_bytes,
            capacity_bytes: self.capacity,
            in_flight: 0,
        }
    }

    /// Get maximum cache size in bytes.
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_key(image_id: ImageId, x: u64) -> CacheKey {
        CacheKey::chunk(image_id, 0, [0, 0, 0, 0, x])
    }

    #[tokio::test]
    async fn test_get_and_put() {
        let cache = ReadCache::new(1024, 4);
        let key = chunk_key(1, 0);

        assert!(cache.get(&key).await.is_none());
        assert!(cache.put(key, Bytes::from_static(b"abc")).await);
        assert_eq!(cache.get(&key).await.unwrap(), Bytes::from_static(b"abc"));

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.memory_bytes, 3);
    }

    #[tokio::test]
    async fn test_lru_eviction_by_bytes() {
        // single shard, 100 bytes
        let cache = ReadCache::new(100, 1);
        cache.put(chunk_key(1, 0), Bytes::from(vec![0u8; 40])).await;
        cache.put(chunk_key(1, 1), Bytes::from(vec![1u8; 40])).await;

        // touch the first entry so the second becomes least recently used
        assert!(cache.get(&chunk_key(1, 0)).await.is_some());
        cache.put(chunk_key(1, 2), Bytes::from(vec![2u8; 40])).await;

        assert!(cache.get(&chunk_key(1, 0)).await.is_some());
        assert!(cache.get(&chunk_key(1, 1)).await.is_none());
        assert!(cache.get(&chunk_key(1, 2)).await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.evictions, 1);
        assert!(stats.memory_bytes <= 100);
    }

    #[tokio::test]
    async fn test_oversized_entry_is_not_cached() {
        let cache = ReadCache::new(64, 2);
        assert!(!cache.put(chunk_key(1, 0), Bytes::from(vec![0u8; 33])).await);
        assert_eq!(cache.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_replacing_entry_keeps_size_consistent() {
        let cache = ReadCache::new(1000, 1);
        let key = CacheKey::group_metadata(7);
        cache.put(key, Bytes::from(vec![0u8; 10])).await;
        cache.put(key, Bytes::from(vec![0u8; 20])).await;

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.memory_bytes, 20);
    }

    #[tokio::test]
    async fn test_invalidate_by_image() {
        let cache = ReadCache::new(10_000, 4);
        for x in 0..5 {
            cache.put(chunk_key(1, x), Bytes::from_static(b"one")).await;
            cache.put(chunk_key(2, x), Bytes::from_static(b"two")).await;
        }
        cache
            .put(CacheKey::attributes(1), Bytes::from_static(b"{}"))
            .await;

        let removed = cache.invalidate(|id| id == 1).await;
        assert_eq!(removed, 6);
        assert!(cache.get(&chunk_key(1, 3)).await.is_none());
        assert!(cache.get(&CacheKey::attributes(1)).await.is_none());
        assert!(cache.get(&chunk_key(2, 3)).await.is_some());
        assert_eq!(cache.stats().await.entries, 5);
    }

    #[tokio::test]
    async fn test_stale_put_is_rejected() {
        let cache = ReadCache::new(10_000, 4);
        let key = chunk_key(1, 0);

        let generation = cache.generation(1);
        cache.invalidate(|id| id == 1).await;
        assert!(!cache.put_if_current(key, Bytes::from_static(b"old"), generation).await);
        assert!(cache.get(&key).await.is_none());

        let generation = cache.generation(1);
        assert!(cache.put_if_current(key, Bytes::from_static(b"new"), generation).await);
        assert_eq!(cache.get(&key).await.unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_invalidation_leaves_other_images_current() {
        let cache = ReadCache::new(10_000, 1);
        let one = cache.generation(1);
        let two = cache.generation(2);

        cache.invalidate(|id| id == 2).await;

        assert_eq!(cache.generation(1), one);
        assert_ne!(cache.generation(2), two);
        assert!(cache.put_if_current(chunk_key(1, 0), Bytes::from_static(b"a"), one).await);
        assert!(!cache.put_if_current(chunk_key(2, 0), Bytes::from_static(b"b"), two).await);
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_clear_advances_every_known_image() {
        let cache = ReadCache::new(10_000, 2);
        let one = cache.generation(1);
        let two = cache.generation(2);
        cache.put(chunk_key(1, 0), Bytes::from_static(b"a")).await;

        assert_eq!(cache.clear().await, 1);
        assert!(!cache.put_if_current(chunk_key(1, 1), Bytes::from_static(b"a"), one).await);
        assert!(!cache.put_if_current(chunk_key(2, 1), Bytes::from_static(b"b"), two).await);
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let cache = std::sync::Arc::new(ReadCache::new(1 << 20, 8));
        let mut handles = Vec::new();
        for task in 0..16u64 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for x in 0..32u64 {
                    let key = chunk_key(task as ImageId, x);
                    cache.put(key, Bytes::from(vec![x as u8; 16])).await;
                    assert!(cache.get(&key).await.is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.stats().await.entries, 16 * 32);
    }
}
