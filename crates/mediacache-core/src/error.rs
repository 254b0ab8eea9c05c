//! Error types for the media cache.
//!
//! Every fallible operation returns [`MediaCacheError`]. The type is `Clone`
//! because a single fetch outcome is broadcast to every caller waiting on the
//! same key.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Main error type for the media cache.
#[derive(Debug, Clone, Error)]
pub enum MediaCacheError {
    // Collaborator errors
    #[error("Failed to resolve fetch URL for {key}: {message}")]
    Resolve { key: String, message: String },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// HTTP status when the failure was a non-success response.
        status: Option<u16>,
    },

    #[error("Asset not found: {key}")]
    NotFound { key: String },

    #[error("Fetch for {key} ended without a result")]
    FetchAborted { key: String },

    // Local storage errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    // Input and configuration errors
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("JSON error: {message}")]
    Json { message: String },
}

/// Result type alias for media cache operations.
pub type Result<T> = std::result::Result<T, MediaCacheError>;

impl From<std::io::Error> for MediaCacheError {
    fn from(err: std::io::Error) -> Self {
        MediaCacheError::Io {
            message: err.to_string(),
            path: None,
            source: Some(Arc::new(err)),
        }
    }
}

impl From<serde_json::Error> for MediaCacheError {
    fn from(err: serde_json::Error) -> Self {
        MediaCacheError::Json {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for MediaCacheError {
    fn from(err: url::ParseError) -> Self {
        MediaCacheError::Config {
            message: format!("Invalid URL: {}", err),
        }
    }
}

impl MediaCacheError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MediaCacheError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(Arc::new(err)),
        }
    }

    /// Check if this error should trigger a retry of a network fetch.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaCacheError::Network { status: None, .. } => true,
            MediaCacheError::Network {
                status: Some(code), ..
            } => matches!(code, 408 | 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Rewrap a resolver failure so callers always see `Resolve` or `NotFound`.
    pub(crate) fn into_resolve_failure(self, key: &str) -> Self {
        match self {
            err @ (MediaCacheError::Resolve { .. } | MediaCacheError::NotFound { .. }) => err,
            other => MediaCacheError::Resolve {
                key: key.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Rewrap a fetcher failure so callers always see `Network` or `NotFound`.
    pub(crate) fn into_network_failure(self) -> Self {
        match self {
            err @ (MediaCacheError::Network { .. } | MediaCacheError::NotFound { .. }) => err,
            other => MediaCacheError::Network {
                message: other.to_string(),
                status: None,
            },
        }
    }
}
