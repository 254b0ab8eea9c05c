//! Cache keys, on-disk names, and the asset value type.

use crate::error::{MediaCacheError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Extensions treated as video references when a key's kind is inferred.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "webm", "m3u8", "avi", "mkv"];

/// Coarse kind tag carried by every asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Image,
    VideoReference,
}

impl AssetKind {
    /// Infer the kind from a logical path's extension.
    pub fn infer(path: &str) -> Self {
        let ext = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            AssetKind::VideoReference
        } else {
            AssetKind::Image
        }
    }

    /// Suffix appended to storage keys of this kind.
    pub fn storage_suffix(&self) -> &'static str {
        match self {
            AssetKind::Image => "img",
            AssetKind::VideoReference => "vid",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Image => "image",
            AssetKind::VideoReference => "video-reference",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identifier of a remote asset, e.g. `milestone_images/<id>.jpg`.
///
/// The path is opaque and not assumed filesystem-safe; use
/// [`CacheKey::storage_key`] for on-disk names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    path: String,
    kind: AssetKind,
}

impl CacheKey {
    /// Create a key, inferring the asset kind from the path extension.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let kind = AssetKind::infer(&path);
        Self::with_kind(path, kind)
    }

    /// Create a key with an explicit asset kind.
    pub fn with_kind(path: impl Into<String>, kind: AssetKind) -> Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(MediaCacheError::InvalidKey(
                "cache key path must not be empty".to_string(),
            ));
        }
        Ok(Self { path, kind })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    /// Filesystem-safe name for this key.
    pub fn storage_key(&self) -> StorageKey {
        StorageKey::for_key(self)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Filesystem-safe transformation of a [`CacheKey`].
///
/// Lowercase hex SHA-256 of the logical path followed by a kind suffix, so the
/// name has a fixed length and never contains separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    fn for_key(key: &CacheKey) -> Self {
        let digest = Sha256::digest(key.path.as_bytes());
        StorageKey(format!(
            "{}.{}",
            hex::encode(digest),
            key.kind.storage_suffix()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable asset bytes plus their kind.
///
/// Cloning only bumps a reference count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    bytes: Bytes,
    kind: AssetKind,
}

impl Asset {
    pub fn new(kind: AssetKind, bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            kind,
        }
    }

    /// Wrap bytes using the kind carried by `key`.
    pub fn for_key(key: &CacheKey, bytes: impl Into<Bytes>) -> Self {
        Self::new(key.kind(), bytes)
    }

    pub fn kind(&self) -> AssetKind {
        self.kind
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
