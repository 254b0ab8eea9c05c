//! Fetch-or-populate with at most one network fetch per key.
//!
//! On a cache miss the first caller spawns a fetch task and registers a
//! `watch` channel for the key; later callers for the same key subscribe to
//! that channel instead of fetching again. The task resolves the URL, fetches
//! the bytes, populates the cache, drops the in-flight entry and then
//! broadcasts the outcome.
//!
//! Per-key lifecycle: `Idle -> Resolving -> Fetching -> {Populated, Failed} -> Idle`.
//! Only the cache tiers persist anything; the in-flight table holds a key just
//! while its fetch is outstanding.
//!
//! Dropping a caller's future does not cancel the spawned fetch. If every
//! caller goes away the fetch still completes and populates the cache.

use crate::error::{MediaCacheError, Result};
use crate::key::{Asset, CacheKey};
use crate::remote::{DynFetcher, DynResolver};
use crate::tiered::TieredCache;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

type FetchOutcome = Result<Asset>;
type FlightReceiver = watch::Receiver<Option<FetchOutcome>>;
type FlightTable = Mutex<HashMap<CacheKey, FlightReceiver>>;

struct Inner {
    cache: Arc<TieredCache>,
    resolver: DynResolver,
    fetcher: DynFetcher,
    in_flight: FlightTable,
    url_ttl_secs: u32,
}

/// Wraps a [`TieredCache`] with single-flight fetch-or-populate semantics.
///
/// Cheap to clone; clones share the cache and the in-flight table.
#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl FetchCoordinator {
    pub fn new(
        cache: Arc<TieredCache>,
        resolver: DynResolver,
        fetcher: DynFetcher,
        url_ttl_secs: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache,
                resolver,
                fetcher,
                in_flight: Mutex::new(HashMap::new()),
                url_ttl_secs,
            }),
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.inner.cache
    }

    /// Return the asset for `key`, fetching it from `namespace` on a miss.
    ///
    /// Concurrent callers for the same key share one resolve and one fetch and
    /// all observe the same outcome. Failures are not cached.
    pub async fn fetch_or_get(&self, key: &CacheKey, namespace: &str) -> Result<Asset> {
        if let Some(asset) = self.inner.cache.get(key).await {
            return Ok(asset);
        }

        let mut rx = match self.join_or_start(key, namespace) {
            Flight::Ready(asset) => return Ok(asset),
            Flight::Waiting(rx) => rx,
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(MediaCacheError::FetchAborted {
                key: key.path().to_string(),
            })
        })
    }

    /// Warm the cache for several keys concurrently.
    pub async fn prefetch(&self, keys: &[CacheKey], namespace: &str) -> Vec<Result<Asset>> {
        join_all(keys.iter().map(|key| self.fetch_or_get(key, namespace))).await
    }

    /// Drop `key` from both tiers. An outstanding fetch is left to finish.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.inner.cache.remove(key).await;
    }

    /// Number of keys with a fetch currently outstanding.
    pub fn in_flight_count(&self) -> usize {
        self.inner.lock_flights().len()
    }

    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.inner.lock_flights().contains_key(key)
    }

    /// Join an existing flight for `key` or register and spawn a new one.
    ///
    /// Check and insert happen under a single lock acquisition.
    fn join_or_start(&self, key: &CacheKey, namespace: &str) -> Flight {
        let mut flights = self.inner.lock_flights();

        if let Some(rx) = flights.get(key) {
            debug!("Joining in-flight fetch for {}", key);
            return Flight::Waiting(rx.clone());
        }

        // A flight that finished after our cache check has already populated
        // memory before leaving the table.
        if let Some(asset) = self.inner.cache.get_memory(key) {
            return Flight::Ready(asset);
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(key.clone(), rx.clone());
        drop(flights);

        let guard = FlightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
        };
        tokio::spawn(Inner::run_flight(guard, namespace.to_string(), tx));

        Flight::Waiting(rx)
    }
}

enum Flight {
    Ready(Asset),
    Waiting(FlightReceiver),
}

/// Removes a key from the in-flight table when dropped, including on panic.
struct FlightGuard {
    inner: Arc<Inner>,
    key: CacheKey,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.lock_flights().remove(&self.key);
        trace!("{}: Idle", self.key);
    }
}

impl Inner {
    fn lock_flights(&self) -> MutexGuard<'_, HashMap<CacheKey, FlightReceiver>> {
        // The table holds no invariants a panicking holder could break.
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_flight(
        guard: FlightGuard,
        namespace: String,
        tx: watch::Sender<Option<FetchOutcome>>,
    ) {
        let inner = Arc::clone(&guard.inner);
        let key = guard.key.clone();

        let outcome = inner.resolve_and_fetch(&key, &namespace).await;

        match &outcome {
            Ok(asset) => {
                inner.cache.set(&key, asset.clone()).await;
                trace!("{}: Populated", key);
            }
            Err(e) => {
                warn!("Fetch for {} failed: {}", key, e);
                trace!("{}: Failed", key);
            }
        }

        // Leave the table before notifying so a caller arriving after a
        // failure starts a fresh attempt.
        drop(guard);

        if tx.send(Some(outcome)).is_err() {
            debug!("All waiters for {} went away before the fetch finished", key);
        }
    }

    async fn resolve_and_fetch(&self, key: &CacheKey, namespace: &str) -> FetchOutcome {
        trace!("{}: Resolving", key);
        let url = self
            .resolver
            .resolve(key, namespace, self.url_ttl_secs)
            .await
            .map_err(|e| e.into_resolve_failure(key.path()))?;

        trace!("{}: Fetching", key);
        let bytes = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(MediaCacheError::into_network_failure)?;

        debug!("Fetched {} ({} bytes)", key, bytes.len());
        Ok(Asset::for_key(key, bytes))
    }
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("url_ttl_secs", &self.inner.url_ttl_secs)
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{ByteFetcher, RemoteResolver};
    use crate::store::{DiskStore, MemoryStore};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use url::Url;

    struct EchoResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteResolver for EchoResolver {
        async fn resolve(&self, key: &CacheKey, namespace: &str, ttl_secs: u32) -> Result<Url> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(ttl_secs, 30);
            Ok(Url::parse(&format!("https://cdn.test/{}/{}", namespace, key.path())).unwrap())
        }
    }

    struct PathFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ByteFetcher for PathFetcher {
        async fn fetch(&self, url: &Url) -> Result<Bytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(url.path().to_string()))
        }
    }

    struct BrokenFetcher;

    #[async_trait]
    impl ByteFetcher for BrokenFetcher {
        async fn fetch(&self, _url: &Url) -> Result<Bytes> {
            Err(MediaCacheError::Config {
                message: "unexpected".into(),
            })
        }
    }

    fn create_cache(temp: &TempDir) -> Arc<TieredCache> {
        Arc::new(TieredCache::new(
            MemoryStore::new(1024 * 1024),
            DiskStore::new(temp.path().join("media")),
        ))
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let temp = TempDir::new().unwrap();
        let resolver = Arc::new(EchoResolver {
            calls: AtomicUsize::new(0),
        });
        let fetcher = Arc::new(PathFetcher {
            calls: AtomicUsize::new(0),
        });
        let coordinator =
            FetchCoordinator::new(create_cache(&temp), resolver.clone(), fetcher.clone(), 30);
        let key = CacheKey::new("p/a.jpg").unwrap();

        let first = coordinator.fetch_or_get(&key, "posts").await.unwrap();
        assert_eq!(first.bytes().as_ref(), b"/posts/p/a.jpg");

        let second = coordinator.fetch_or_get(&key, "posts").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_fetcher_errors_are_normalized() {
        let temp = TempDir::new().unwrap();
        let coordinator = FetchCoordinator::new(
            create_cache(&temp),
            Arc::new(EchoResolver {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(BrokenFetcher),
            30,
        );
        let key = CacheKey::new("p/a.jpg").unwrap();

        let err = coordinator.fetch_or_get(&key, "posts").await.unwrap_err();
        assert!(matches!(err, MediaCacheError::Network { .. }));
        assert!(!coordinator.is_in_flight(&key));
        assert!(coordinator.cache().get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_prefetch_warms_every_key() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(PathFetcher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = FetchCoordinator::new(
            create_cache(&temp),
            Arc::new(EchoResolver {
                calls: AtomicUsize::new(0),
            }),
            fetcher.clone(),
            30,
        );
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| CacheKey::new(format!("p/{}.jpg", i)).unwrap())
            .collect();

        let results = coordinator.prefetch(&keys, "posts").await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
        for key in &keys {
            assert!(coordinator.cache().get_memory(key).is_some());
        }
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(PathFetcher {
            calls: AtomicUsize::new(0),
        });
        let coordinator = FetchCoordinator::new(
            create_cache(&temp),
            Arc::new(EchoResolver {
                calls: AtomicUsize::new(0),
            }),
            fetcher.clone(),
            30,
        );
        let key = CacheKey::new("p/a.jpg").unwrap();

        coordinator.fetch_or_get(&key, "posts").await.unwrap();
        coordinator.invalidate(&key).await;
        coordinator.fetch_or_get(&key, "posts").await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
