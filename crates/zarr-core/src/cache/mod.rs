//! Read cache and in-flight registry.

mod in_flight;
mod read_cache;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub use in_flight::{InFlight, SharedResult};
pub use read_cache::{CacheKey, EntryKind, ReadCache};

/// Shard owning `key` among `shards` shards.
pub(crate) fn shard_index<K: Hash>(key: &K, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}
