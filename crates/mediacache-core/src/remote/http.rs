//! HTTP implementations of the remote collaborators.
//!
//! - [`HttpByteFetcher`]: plain `GET` with retries for transient failures
//! - [`HttpSignedUrlResolver`]: object-store signing endpoint
//!   (`POST {base}/object/sign/{bucket}/{path}`)

use super::{ByteFetcher, RemoteResolver};
use crate::config::{CacheDefaults, MediaCacheConfig};
use crate::error::{MediaCacheError, Result};
use crate::key::CacheKey;
use crate::retry::{retry_async, RetryPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(CacheDefaults::USER_AGENT)
        .build()
        .map_err(|e| MediaCacheError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// URL without its query string, so signatures never reach the logs.
fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

/// Downloads bytes with `GET`, retrying transport errors and retryable
/// statuses (408, 429, 5xx gateway errors).
#[derive(Debug, Clone)]
pub struct HttpByteFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpByteFetcher {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            retry,
        })
    }

    pub fn from_config(config: &MediaCacheConfig) -> Result<Self> {
        let retry = RetryPolicy::default()
            .with_max_attempts(config.fetch_retry_attempts)
            .with_base_delay(CacheDefaults::FETCH_RETRY_BASE_DELAY)
            .with_max_delay(CacheDefaults::FETCH_RETRY_MAX_DELAY);
        Self::new(config.request_timeout(), retry)
    }

    /// Map a non-success status to the cache's error kinds.
    pub fn status_error(status: StatusCode, url: &Url) -> MediaCacheError {
        if status == StatusCode::NOT_FOUND {
            MediaCacheError::NotFound {
                key: url.path().to_string(),
            }
        } else {
            MediaCacheError::Network {
                message: format!("GET {} returned {}", redact(url), status),
                status: Some(status.as_u16()),
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Bytes> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| MediaCacheError::Network {
                message: format!("GET {} failed: {}", redact(url), e.without_url()),
                status: None,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, url));
        }

        response.bytes().await.map_err(|e| MediaCacheError::Network {
            message: format!("Reading body of {} failed: {}", redact(url), e.without_url()),
            status: None,
        })
    }
}

#[async_trait]
impl ByteFetcher for HttpByteFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        let (result, stats) = retry_async(
            &self.retry,
            || self.fetch_once(url),
            MediaCacheError::is_retryable,
        )
        .await;

        match &result {
            Ok(bytes) => debug!(
                "Fetched {} bytes from {} in {} attempt(s), {:?} backoff",
                bytes.len(),
                redact(url),
                stats.attempts,
                stats.total_delay
            ),
            Err(e) => warn!("Fetch of {} failed: {}", redact(url), e),
        }
        result
    }
}

#[derive(Debug, Serialize)]
struct SignRequest {
    #[serde(rename = "expiresIn")]
    expires_in: u32,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

/// Resolves keys through an object store's URL-signing endpoint.
///
/// Credentials are opaque strings supplied by the host; this type never
/// obtains or refreshes them.
#[derive(Debug, Clone)]
pub struct HttpSignedUrlResolver {
    client: Client,
    base: Url,
    bearer_token: Option<String>,
    api_key: Option<String>,
}

impl HttpSignedUrlResolver {
    /// Create a resolver for the storage API rooted at `base`
    /// (e.g. `https://example.test/storage/v1`).
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base)?;
        if base.cannot_be_a_base() {
            return Err(MediaCacheError::Config {
                message: format!("Storage base URL cannot have paths: {}", base),
            });
        }
        Ok(Self {
            client: build_client(timeout)?,
            base,
            bearer_token: None,
            api_key: None,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Signing endpoint for `key` in `namespace`. Path segments are
    /// percent-encoded individually.
    pub fn sign_endpoint(&self, key: &CacheKey, namespace: &str) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| MediaCacheError::Config {
                message: format!("Storage base URL cannot have paths: {}", self.base),
            })?
            .pop_if_empty()
            .push("object")
            .push("sign")
            .push(namespace)
            .extend(key.path().split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// Turn the endpoint's `signedURL` (usually relative to the storage base)
    /// into an absolute URL.
    pub fn absolute_signed_url(&self, signed: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(signed) {
            return Ok(url);
        }
        let joined = format!(
            "{}/{}",
            self.base.as_str().trim_end_matches('/'),
            signed.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }
}

#[async_trait]
impl RemoteResolver for HttpSignedUrlResolver {
    async fn resolve(&self, key: &CacheKey, namespace: &str, ttl_secs: u32) -> Result<Url> {
        let resolve_err = |message: String| MediaCacheError::Resolve {
            key: key.path().to_string(),
            message,
        };

        let endpoint = self.sign_endpoint(key, namespace)?;
        let mut request = self
            .client
            .post(endpoint)
            .json(&SignRequest {
                expires_in: ttl_secs,
            });
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| resolve_err(format!("sign request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(MediaCacheError::NotFound {
                key: key.path().to_string(),
            });
        }
        if !status.is_success() {
            return Err(resolve_err(format!("sign endpoint returned {}", status)));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| resolve_err(format!("invalid sign response: {}", e)))?;

        let url = self
            .absolute_signed_url(&body.signed_url)
            .map_err(|e| resolve_err(e.to_string()))?;
        debug!("Resolved {} in {} (ttl {}s)", key, namespace, ttl_secs);
        Ok(url)
    }
}
