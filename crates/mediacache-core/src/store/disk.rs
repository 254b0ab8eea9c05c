//! Persistent tier: one file per storage key in a flat directory.
//!
//! Writes are atomic:
//! 1. Write to a temp file with a PID+counter suffix in the same directory
//! 2. `sync_all` so the bytes reach disk
//! 3. Rename over the target
//!
//! All methods block; async callers run them on `spawn_blocking`.

use crate::config::CacheDefaults;
use crate::error::{MediaCacheError, Result};
use crate::key::CacheKey;
use bytes::Bytes;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Aggregate size of the disk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskUsage {
    pub files: usize,
    pub bytes: u64,
}

/// Flat-directory byte store keyed by [`crate::StorageKey`].
#[derive(Debug)]
pub struct DiskStore {
    dir: PathBuf,
    temp_counter: AtomicU64,
}

impl DiskStore {
    /// Create a store rooted at `dir`. The directory is created lazily on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            temp_counter: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the file backing `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.storage_key().as_str())
    }

    /// Write `bytes` for `key`, replacing any existing file.
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<()> {
        self.ensure_dir()?;

        let path = self.path_for(key);
        let temp_path = self.temp_path(&path);

        if let Err(e) = self.write_temp(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        fs::rename(&temp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            MediaCacheError::Io {
                message: format!(
                    "Failed to rename {} to {}: {}",
                    temp_path.display(),
                    path.display(),
                    e
                ),
                path: Some(path.clone()),
                source: Some(e.into()),
            }
        })?;

        debug!("Wrote {} bytes for {} to {}", bytes.len(), key, path.display());
        Ok(())
    }

    /// Read the bytes for `key`. A missing file is `Ok(None)`, not an error.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MediaCacheError::io_with_path(e, path)),
        }
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Delete the file for `key`. Removing an absent entry succeeds.
    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed disk entry {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MediaCacheError::io_with_path(e, path)),
        }
    }

    /// Delete every file in the cache directory.
    ///
    /// Failures are logged and collected; the remaining files are still
    /// removed. Returns the number of files deleted.
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MediaCacheError::io_with_path(e, &self.dir)),
        };

        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) if entry.path().is_file() => files.push(entry.path()),
                Ok(_) => {}
                Err(e) => warn!("Failed to read entry in {}: {}", self.dir.display(), e),
            }
        }

        self.remove_files(files)
    }

    /// Delete each path, continuing past failures.
    ///
    /// Returns the number deleted, or an `Io` error summarizing every failure
    /// once all paths have been attempted.
    fn remove_files(&self, paths: impl IntoIterator<Item = PathBuf>) -> Result<usize> {
        let mut removed = 0;
        let mut failures: Vec<(PathBuf, std::io::Error)> = Vec::new();

        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to remove cache file {}: {}", path.display(), e);
                    failures.push((path, e));
                }
            }
        }

        debug!("Cleared {} disk entries from {}", removed, self.dir.display());

        if failures.is_empty() {
            return Ok(removed);
        }

        let failed = failures.len();
        let (first_path, first_err) = failures.swap_remove(0);
        Err(MediaCacheError::Io {
            message: format!(
                "Failed to remove {} of {} cache files (first: {}: {})",
                failed,
                removed + failed,
                first_path.display(),
                first_err
            ),
            path: Some(self.dir.clone()),
            source: Some(first_err.into()),
        })
    }

    /// Count and size of committed entries. In-progress temp files are skipped.
    pub fn usage(&self) -> Result<DiskUsage> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DiskUsage::default()),
            Err(e) => return Err(MediaCacheError::io_with_path(e, &self.dir)),
        };

        let mut usage = DiskUsage::default();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(CacheDefaults::TEMP_SUFFIX) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    usage.files += 1;
                    usage.bytes += meta.len();
                }
            }
        }
        Ok(usage)
    }

    // Internal methods

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| MediaCacheError::Io {
            message: format!("Failed to create cache directory: {}", e),
            path: Some(self.dir.clone()),
            source: Some(e.into()),
        })
    }

    fn temp_path(&self, path: &Path) -> PathBuf {
        let seq = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{}.{}{}", process::id(), seq, CacheDefaults::TEMP_SUFFIX));
        PathBuf::from(name)
    }

    fn write_temp(&self, temp_path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| MediaCacheError::io_with_path(e, temp_path))?;

        file.write_all(bytes)
            .map_err(|e| MediaCacheError::io_with_path(e, temp_path))?;
        file.sync_all()
            .map_err(|e| MediaCacheError::io_with_path(e, temp_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, DiskStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = DiskStore::new(temp_dir.path().join("media"));
        (temp_dir, store)
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new(path).unwrap()
    }

    #[test]
    fn test_put_and_get() {
        let (_temp, store) = create_test_store();
        let k = key("milestone_images/1.jpg");

        store.put(&k, b"jpeg bytes").unwrap();

        let value = store.get(&k).unwrap();
        assert_eq!(value.as_deref(), Some(&b"jpeg bytes"[..]));
        assert!(store.contains(&k));
    }

    #[test]
    fn test_get_missing_is_none() {
        let (_temp, store) = create_test_store();
        assert!(store.get(&key("p/missing.jpg")).unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites() {
        let (_temp, store) = create_test_store();
        let k = key("p/a.jpg");

        store.put(&k, b"old").unwrap();
        store.put(&k, b"new").unwrap();

        assert_eq!(store.get(&k).unwrap().as_deref(), Some(&b"new"[..]));
        assert_eq!(store.usage().unwrap().files, 1);
    }

    #[test]
    fn test_file_name_is_storage_key() {
        let (_temp, store) = create_test_store();
        let k = key("../escape/attempt.jpg");

        store.put(&k, b"x").unwrap();

        let path = store.path_for(&k);
        assert_eq!(path.parent().unwrap(), store.dir());
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            k.storage_key().as_str()
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (_temp, store) = create_test_store();
        let k = key("p/a.jpg");

        // Absent key, directory not even created yet
        store.remove(&k).unwrap();

        store.put(&k, b"x").unwrap();
        store.remove(&k).unwrap();
        store.remove(&k).unwrap();
        assert!(store.get(&k).unwrap().is_none());
    }

    #[test]
    fn test_clear_removes_everything() {
        let (_temp, store) = create_test_store();
        for i in 0..5 {
            store.put(&key(&format!("p/{}.jpg", i)), b"data").unwrap();
        }

        assert_eq!(store.clear().unwrap(), 5);
        assert_eq!(store.usage().unwrap(), DiskUsage::default());
    }

    #[test]
    fn test_clear_missing_dir() {
        let (_temp, store) = create_test_store();
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn test_clear_skips_subdirectories() {
        let (_temp, store) = create_test_store();
        store.put(&key("p/a.jpg"), b"a").unwrap();
        store.put(&key("p/b.jpg"), b"b").unwrap();
        // Subdirectories are not cache entries and are left alone
        fs::create_dir_all(store.dir().join("nested")).unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.dir().join("nested").is_dir());
    }

    #[test]
    fn test_put_fails_when_dir_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let blocked = temp_dir.path().join("blocked");
        fs::write(&blocked, b"not a directory").unwrap();
        let store = DiskStore::new(&blocked);

        let result = store.put(&key("p/a.jpg"), b"x");
        assert!(matches!(result, Err(MediaCacheError::Io { .. })));
    }

    #[test]
    fn test_usage_counts_bytes() {
        let (_temp, store) = create_test_store();
        store.put(&key("p/a.jpg"), b"12345").unwrap();
        store.put(&key("p/b.jpg"), b"678").unwrap();

        let usage = store.usage().unwrap();
        assert_eq!(usage.files, 2);
        assert_eq!(usage.bytes, 8);
    }

    #[test]
    fn test_remove_files_continues_past_failures() {
        let (_temp, store) = create_test_store();
        let keys: Vec<CacheKey> = (0..3).map(|i| key(&format!("p/{}.jpg", i))).collect();
        for k in &keys {
            store.put(k, b"data").unwrap();
        }
        // remove_file refuses directories, so this one entry fails
        let blocker = store.dir().join("blocker");
        fs::create_dir_all(&blocker).unwrap();

        let mut paths: Vec<PathBuf> = keys.iter().map(|k| store.path_for(k)).collect();
        paths.insert(1, blocker.clone());

        let err = store.remove_files(paths).unwrap_err();

        match err {
            MediaCacheError::Io { message, path, .. } => {
                assert!(message.contains("1 of 4"), "unexpected message: {}", message);
                assert_eq!(path.as_deref(), Some(store.dir()));
            }
            other => panic!("expected Io error, got {:?}", other),
        }
        for k in &keys {
            assert!(!store.contains(k));
        }
        assert!(blocker.is_dir());
    }
}
