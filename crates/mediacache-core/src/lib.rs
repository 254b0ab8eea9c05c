//! Mediacache Core - tiered cache for remote media assets.
//!
//! Assets (images and video references) are identified by a stable logical
//! path and served from memory, then from a local cache directory, and only
//! fetched over the network when both tiers miss. Network access goes through
//! a [`FetchCoordinator`] that keeps at most one fetch in flight per key.
//!
//! # Example
//!
//! ```rust,ignore
//! use mediacache_core::{HttpSignedUrlResolver, MediaCache, MediaCacheConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> mediacache_core::Result<()> {
//!     let resolver = HttpSignedUrlResolver::new(
//!         "https://example.test/storage/v1",
//!         Duration::from_secs(10),
//!     )?
//!     .with_bearer_token("<session token>");
//!
//!     let cache = MediaCache::builder(MediaCacheConfig::default())
//!         .resolver(Arc::new(resolver))
//!         .build()?;
//!
//!     let photo = cache.images().fetch("milestone_images/42.jpg").await?;
//!     println!("{} bytes", photo.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod remote;
pub mod retry;
pub mod store;
pub mod tiered;

mod facade;

pub use config::{CacheDefaults, MediaCacheConfig};
pub use coordinator::FetchCoordinator;
pub use error::{MediaCacheError, Result};
pub use facade::{
    Image, ImageCache, KindCache, MediaCache, MediaCacheBuilder, MediaKind, VideoCache,
    VideoReference,
};
pub use key::{Asset, AssetKind, CacheKey, StorageKey};
pub use remote::{
    ByteFetcher, DynFetcher, DynResolver, HttpByteFetcher, HttpSignedUrlResolver, RemoteResolver,
};
pub use retry::{retry_async, RetryPolicy, RetryStats};
pub use store::{DiskStore, DiskUsage, MemoryStore};
pub use tiered::{CacheStats, TieredCache};
