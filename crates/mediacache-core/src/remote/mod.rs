//! External collaborators consulted when both cache tiers miss.
//!
//! - [`RemoteResolver`] turns a logical key into a short-lived fetch URL
//! - [`ByteFetcher`] downloads the bytes behind that URL
//!
//! HTTP implementations live in [`http`]; tests and hosts may supply their own.

pub mod http;

use crate::error::Result;
use crate::key::CacheKey;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use url::Url;

pub use http::{HttpByteFetcher, HttpSignedUrlResolver};

/// Produces a time-limited URL for a key in a storage namespace (bucket).
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// Resolve `key` in `namespace` to a URL valid for roughly `ttl_secs`.
    ///
    /// The URL must be consumed promptly; callers never cache it.
    async fn resolve(&self, key: &CacheKey, namespace: &str, ttl_secs: u32) -> Result<Url>;
}

/// Downloads raw bytes from a URL.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

pub type DynResolver = Arc<dyn RemoteResolver>;
pub type DynFetcher = Arc<dyn ByteFetcher>;
