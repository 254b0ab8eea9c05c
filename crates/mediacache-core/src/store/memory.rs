//! Bounded in-memory tier.

use crate::key::{Asset, CacheKey};
use mini_moka::sync::Cache;
use std::time::Duration;

/// Byte-weighted memory store.
///
/// Entries may be evicted at any time once the byte budget is exceeded, so a
/// miss here means "unknown", never "absent". Operations have no error channel.
#[derive(Clone)]
pub struct MemoryStore {
    cache: Cache<CacheKey, Asset>,
    capacity_bytes: u64,
}

impl MemoryStore {
    /// Create a store holding at most `capacity_bytes` of asset data.
    pub fn new(capacity_bytes: u64) -> Self {
        Self::with_time_to_idle(capacity_bytes, None)
    }

    /// Create a store whose entries also expire after `idle` without reads.
    pub fn with_time_to_idle(capacity_bytes: u64, idle: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &CacheKey, asset: &Asset| -> u32 {
                u32::try_from(asset.len()).unwrap_or(u32::MAX)
            });
        if let Some(idle) = idle {
            builder = builder.time_to_idle(idle);
        }
        Self {
            cache: builder.build(),
            capacity_bytes,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Asset> {
        self.cache.get(key)
    }

    pub fn put(&self, key: CacheKey, asset: Asset) {
        self.cache.insert(key, asset);
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    pub fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries; pending evictions may not be reflected.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Approximate total bytes held.
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("capacity_bytes", &self.capacity_bytes)
            .field("entry_count", &self.entry_count())
            .finish()
    }
}
