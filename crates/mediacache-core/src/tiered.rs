//! Memory-over-disk cache with read-through promotion and write-through.
//!
//! Reads check memory, then disk; a disk hit is promoted into memory before it
//! is returned. Writes go to both tiers. Disk failures are logged and treated
//! as misses, so the memory tier keeps serving the session.

use crate::error::{MediaCacheError, Result};
use crate::key::{Asset, CacheKey};
use crate::store::{DiskStore, DiskUsage, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

/// Counters and sizes across both tiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub disk_write_failures: u64,
    /// Approximate entries currently held in memory.
    pub memory_entries: u64,
    /// Approximate bytes currently held in memory.
    pub memory_bytes: u64,
    pub memory_capacity_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    disk_write_failures: AtomicU64,
}

/// Two-tier asset cache.
#[derive(Debug)]
pub struct TieredCache {
    memory: MemoryStore,
    disk: Arc<DiskStore>,
    counters: Counters,
    /// Bumped after every completed remove or clear. Promotions compare it
    /// under the lock so a disk read that raced a removal is never put back.
    removals: Mutex<u64>,
}

impl TieredCache {
    pub fn new(memory: MemoryStore, disk: DiskStore) -> Self {
        Self {
            memory,
            disk: Arc::new(disk),
            counters: Counters::default(),
            removals: Mutex::new(0),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn disk(&self) -> &DiskStore {
        &self.disk
    }

    /// Look up `key` in memory, then on disk.
    ///
    /// A disk hit is promoted into memory before returning. Disk read errors
    /// count as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Asset> {
        if let Some(asset) = self.memory.get(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            trace!("Memory hit for {}", key);
            return Some(asset);
        }

        let generation = *self.lock_removals();
        match self.disk_get(key).await {
            Ok(Some(bytes)) => {
                self.counters.disk_hits.fetch_add(1, Ordering::Relaxed);
                let asset = Asset::for_key(key, bytes);
                let removals = self.lock_removals();
                if *removals == generation {
                    self.memory.put(key.clone(), asset.clone());
                    debug!("Promoted {} from disk ({} bytes)", key, asset.len());
                } else {
                    debug!("Skipped promotion of {}, removed during read", key);
                }
                drop(removals);
                Some(asset)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Cache miss for {}", key);
                None
            }
            Err(e) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!("Disk read failed for {}, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Memory-only probe. Never touches disk.
    pub fn get_memory(&self, key: &CacheKey) -> Option<Asset> {
        self.memory.get(key)
    }

    /// Store `asset` in both tiers.
    ///
    /// A disk failure is logged and swallowed; the asset is then only held in
    /// memory and will not survive a restart.
    pub async fn set(&self, key: &CacheKey, asset: Asset) {
        self.memory.put(key.clone(), asset.clone());

        let disk = Arc::clone(&self.disk);
        let owned_key = key.clone();
        let result = run_blocking(move || disk.put(&owned_key, asset.bytes())).await;

        if let Err(e) = result {
            self.counters
                .disk_write_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!("Disk write failed for {}, keeping memory copy only: {}", key, e);
        }
    }

    /// Remove `key` from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        self.memory.remove(key);

        let disk = Arc::clone(&self.disk);
        let owned_key = key.clone();
        if let Err(e) = run_blocking(move || disk.remove(&owned_key)).await {
            warn!("Failed to remove disk entry for {}: {}", key, e);
        }

        let mut removals = self.lock_removals();
        *removals += 1;
        self.memory.remove(key);
    }

    /// Empty both tiers. Returns the number of disk files removed.
    pub async fn clear(&self) -> usize {
        self.memory.clear();

        let disk = Arc::clone(&self.disk);
        let removed = match run_blocking(move || disk.clear()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Disk clear finished with failures: {}", e);
                0
            }
        };

        let mut removals = self.lock_removals();
        *removals += 1;
        self.memory.clear();
        removed
    }

    /// Size of the disk tier.
    pub async fn disk_usage(&self) -> Result<DiskUsage> {
        let disk = Arc::clone(&self.disk);
        run_blocking(move || disk.usage()).await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.counters.disk_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            disk_write_failures: self.counters.disk_write_failures.load(Ordering::Relaxed),
            memory_entries: self.memory.entry_count(),
            memory_bytes: self.memory.weighted_size(),
            memory_capacity_bytes: self.memory.capacity_bytes(),
        }
    }

    fn lock_removals(&self) -> MutexGuard<'_, u64> {
        self.removals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn disk_get(&self, key: &CacheKey) -> Result<Option<bytes::Bytes>> {
        let disk = Arc::clone(&self.disk);
        let owned_key = key.clone();
        run_blocking(move || disk.get(&owned_key)).await
    }
}

/// Run blocking disk I/O off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MediaCacheError::Io {
            message: format!("Disk task failed: {}", e),
            path: None,
            source: None,
        })?
}
