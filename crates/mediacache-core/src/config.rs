//! Configuration for the media cache.
//!
//! [`CacheDefaults`] holds the constants; [`MediaCacheConfig`] is the
//! serializable runtime configuration a host passes to the builder.

use crate::error::{MediaCacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default values used when a config field is not set.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const CACHE_DIR_NAME: &'static str = "mediacache";
    pub const MEMORY_CAPACITY_BYTES: u64 = 64 * 1024 * 1024; // 64MB
    pub const URL_TTL_SECS: u32 = 60;
    pub const IMAGE_NAMESPACE: &'static str = "images";
    pub const VIDEO_NAMESPACE: &'static str = "videos";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const FETCH_RETRY_ATTEMPTS: u32 = 3;
    pub const FETCH_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
    pub const FETCH_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
    pub const USER_AGENT: &'static str = "mediacache/0.1";
    pub const TEMP_SUFFIX: &'static str = ".tmp";
}

/// Runtime configuration for a [`crate::MediaCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct MediaCacheConfig {
    /// Directory for the disk tier. `None` uses the OS cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Byte budget of the memory tier.
    pub memory_capacity_bytes: u64,
    /// Evict memory entries not read for this long.
    pub memory_time_to_idle_secs: Option<u64>,
    /// Lifetime requested for resolved fetch URLs.
    pub url_ttl_secs: u32,
    /// Storage namespace (bucket) holding images.
    pub image_namespace: String,
    /// Storage namespace (bucket) holding video references.
    pub video_namespace: String,
    /// Per-request timeout of the HTTP fetcher.
    pub request_timeout_secs: u64,
    /// Attempts (including the first) for retryable fetch failures.
    pub fetch_retry_attempts: u32,
    /// Create the cache directory on build if it is missing.
    pub auto_create_dir: bool,
}

impl Default for MediaCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_capacity_bytes: CacheDefaults::MEMORY_CAPACITY_BYTES,
            memory_time_to_idle_secs: None,
            url_ttl_secs: CacheDefaults::URL_TTL_SECS,
            image_namespace: CacheDefaults::IMAGE_NAMESPACE.to_string(),
            video_namespace: CacheDefaults::VIDEO_NAMESPACE.to_string(),
            request_timeout_secs: CacheDefaults::REQUEST_TIMEOUT_SECS,
            fetch_retry_attempts: CacheDefaults::FETCH_RETRY_ATTEMPTS,
            auto_create_dir: true,
        }
    }
}

impl MediaCacheConfig {
    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| MediaCacheError::io_with_path(e, path))?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory of the disk tier after applying the OS default.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(CacheDefaults::CACHE_DIR_NAME),
        }
    }

    pub fn memory_time_to_idle(&self) -> Option<Duration> {
        self.memory_time_to_idle_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the cache cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.memory_capacity_bytes == 0 {
            return Err(MediaCacheError::Config {
                message: "memory_capacity_bytes must be greater than zero".to_string(),
            });
        }
        if self.url_ttl_secs == 0 {
            return Err(MediaCacheError::Config {
                message: "url_ttl_secs must be greater than zero".to_string(),
            });
        }
        if self.fetch_retry_attempts == 0 {
            return Err(MediaCacheError::Config {
                message: "fetch_retry_attempts must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("image_namespace", &self.image_namespace),
            ("video_namespace", &self.video_namespace),
        ] {
            if value.trim().is_empty() {
                return Err(MediaCacheError::Config {
                    message: format!("{} must not be empty", field),
                });
            }
        }
        Ok(())
    }
}
