//! Owned entry point wiring the tiers, collaborators and coordinator together.

use crate::config::MediaCacheConfig;
use crate::coordinator::FetchCoordinator;
use crate::error::{MediaCacheError, Result};
use crate::key::{Asset, AssetKind, CacheKey};
use crate::remote::{DynFetcher, DynResolver, HttpByteFetcher};
use crate::store::{DiskStore, MemoryStore};
use crate::tiered::{CacheStats, TieredCache};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Compile-time tag selecting an [`AssetKind`].
pub trait MediaKind: Send + Sync + 'static {
    const KIND: AssetKind;
}

/// Marker for still images (profile, milestone and post photos).
#[derive(Debug, Clone, Copy)]
pub struct Image;

/// Marker for video references.
#[derive(Debug, Clone, Copy)]
pub struct VideoReference;

impl MediaKind for Image {
    const KIND: AssetKind = AssetKind::Image;
}

impl MediaKind for VideoReference {
    const KIND: AssetKind = AssetKind::VideoReference;
}

/// Typed view over the shared cache for one asset kind and namespace.
#[derive(Debug)]
pub struct KindCache<K: MediaKind> {
    coordinator: FetchCoordinator,
    namespace: String,
    _kind: PhantomData<K>,
}

pub type ImageCache = KindCache<Image>;
pub type VideoCache = KindCache<VideoReference>;

impl<K: MediaKind> Clone for KindCache<K> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            namespace: self.namespace.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: MediaKind> KindCache<K> {
    pub fn new(coordinator: FetchCoordinator, namespace: impl Into<String>) -> Self {
        Self {
            coordinator,
            namespace: namespace.into(),
            _kind: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn key(&self, path: &str) -> Result<CacheKey> {
        CacheKey::with_kind(path, K::KIND)
    }

    /// Cached asset or a fresh fetch from this kind's namespace.
    pub async fn fetch(&self, path: &str) -> Result<Asset> {
        let key = self.key(path)?;
        self.coordinator.fetch_or_get(&key, &self.namespace).await
    }

    /// Cached asset only; never touches the network.
    pub async fn cached(&self, path: &str) -> Result<Option<Asset>> {
        let key = self.key(path)?;
        Ok(self.coordinator.cache().get(&key).await)
    }

    pub async fn invalidate(&self, path: &str) -> Result<()> {
        let key = self.key(path)?;
        self.coordinator.invalidate(&key).await;
        Ok(())
    }

    pub async fn prefetch(&self, paths: &[&str]) -> Result<Vec<Result<Asset>>> {
        let keys = paths
            .iter()
            .map(|path| self.key(path))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.coordinator.prefetch(&keys, &self.namespace).await)
    }
}

/// Media cache owned by the host process and injected where needed.
#[derive(Debug, Clone)]
pub struct MediaCache {
    config: MediaCacheConfig,
    cache_dir: PathBuf,
    coordinator: FetchCoordinator,
}

impl MediaCache {
    pub fn builder(config: MediaCacheConfig) -> MediaCacheBuilder {
        MediaCacheBuilder::new(config)
    }

    pub fn config(&self) -> &MediaCacheConfig {
        &self.config
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        self.coordinator.cache()
    }

    pub fn images(&self) -> ImageCache {
        KindCache::new(self.coordinator.clone(), &self.config.image_namespace)
    }

    pub fn videos(&self) -> VideoCache {
        KindCache::new(self.coordinator.clone(), &self.config.video_namespace)
    }

    /// Empty both tiers. Returns the number of disk files removed.
    pub async fn clear(&self) -> usize {
        self.cache().clear().await
    }

    pub fn stats(&self) -> CacheStats {
        self.cache().stats()
    }
}

/// Builder for [`MediaCache`].
///
/// A resolver is required. Without an explicit fetcher an
/// [`HttpByteFetcher`] is created from the config.
///
/// # Example
///
/// ```rust,ignore
/// let cache = MediaCache::builder(MediaCacheConfig::default())
///     .resolver(Arc::new(HttpSignedUrlResolver::new(base, timeout)?))
///     .build()?;
/// let photo = cache.images().fetch("milestone_images/42.jpg").await?;
/// ```
pub struct MediaCacheBuilder {
    config: MediaCacheConfig,
    resolver: Option<DynResolver>,
    fetcher: Option<DynFetcher>,
}

impl MediaCacheBuilder {
    pub fn new(config: MediaCacheConfig) -> Self {
        Self {
            config,
            resolver: None,
            fetcher: None,
        }
    }

    pub fn resolver(mut self, resolver: DynResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn fetcher(mut self, fetcher: DynFetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn build(self) -> Result<MediaCache> {
        self.config.validate()?;

        let resolver = self.resolver.ok_or_else(|| MediaCacheError::Config {
            message: "A remote resolver is required".to_string(),
        })?;
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpByteFetcher::from_config(&self.config)?),
        };

        let cache_dir = self.config.resolved_cache_dir();
        if self.config.auto_create_dir && !cache_dir.exists() {
            std::fs::create_dir_all(&cache_dir).map_err(|e| MediaCacheError::Io {
                message: format!("Failed to create cache directory: {}", cache_dir.display()),
                path: Some(cache_dir.clone()),
                source: Some(e.into()),
            })?;
        }

        let memory = MemoryStore::with_time_to_idle(
            self.config.memory_capacity_bytes,
            self.config.memory_time_to_idle(),
        );
        let disk = DiskStore::new(&cache_dir);
        let cache = Arc::new(TieredCache::new(memory, disk));
        let coordinator =
            FetchCoordinator::new(cache, resolver, fetcher, self.config.url_ttl_secs);

        info!(
            "Media cache ready at {} ({} bytes memory)",
            cache_dir.display(),
            self.config.memory_capacity_bytes
        );

        Ok(MediaCache {
            config: self.config,
            cache_dir,
            coordinator,
        })
    }
}
