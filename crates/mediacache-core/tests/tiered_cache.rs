//! Integration tests for the two-tier cache: promotion, write-through,
//! removal and disk failure handling.

use mediacache_core::{Asset, CacheKey, DiskStore, MemoryStore, TieredCache};
use tempfile::TempDir;

fn create_cache(dir: &std::path::Path) -> TieredCache {
    TieredCache::new(MemoryStore::new(8 * 1024 * 1024), DiskStore::new(dir))
}

fn key(path: &str) -> CacheKey {
    CacheKey::new(path).expect("valid key")
}

#[tokio::test]
async fn test_disk_only_entry_is_promoted_with_identical_bytes() {
    let temp_dir = TempDir::new().unwrap();
    let cache = create_cache(&temp_dir.path().join("media"));

    for (i, payload) in [&b"first"[..], &[0u8, 255, 7, 7][..], &[][..]].iter().enumerate() {
        let k = key(&format!("milestone_images/{}.jpg", i));
        cache.disk().put(&k, payload).unwrap();
        assert!(cache.memory().get(&k).is_none());

        let asset = cache.get(&k).await.expect("disk hit");

        assert_eq!(asset.bytes().as_ref(), *payload);
        let promoted = cache.memory().get(&k).expect("promoted into memory");
        assert_eq!(promoted.bytes(), asset.bytes());
    }
}

#[tokio::test]
async fn test_set_writes_through_to_both_tiers() {
    let temp_dir = TempDir::new().unwrap();
    let cache = create_cache(&temp_dir.path().join("media"));

    let keys = ["profile/u1.png", "posts/p9.jpg", "milestone_videos/m3.mp4"];
    for path in keys {
        let k = key(path);
        let asset = Asset::for_key(&k, format!("payload for {}", path).into_bytes());

        cache.set(&k, asset.clone()).await;

        assert_eq!(cache.memory().get(&k), Some(asset.clone()));
        assert_eq!(cache.disk().get(&k).unwrap().as_ref(), Some(asset.bytes()));
    }
}

#[tokio::test]
async fn test_remove_absent_key_succeeds_in_both_stores() {
    let temp_dir = TempDir::new().unwrap();
    let disk = DiskStore::new(temp_dir.path().join("media"));
    let memory = MemoryStore::new(1024);
    let k = key("p/never-stored.jpg");

    memory.remove(&k);
    assert!(disk.remove(&k).is_ok());

    let cache = TieredCache::new(memory, disk);
    cache.remove(&k).await;
    assert!(cache.get(&k).await.is_none());
}

#[tokio::test]
async fn test_restart_serves_from_disk_and_promotes() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("media");
    let k = key("p/a.jpg");

    {
        let cache = create_cache(&dir);
        cache.set(&k, Asset::for_key(&k, b"B".to_vec())).await;
    }

    // New process: empty memory tier over the same directory
    let cache = create_cache(&dir);
    assert!(cache.memory().get(&k).is_none());

    let asset = cache.get(&k).await.expect("served from disk");
    assert_eq!(asset.bytes().as_ref(), b"B");
    assert!(cache.memory().get(&k).is_some());

    let stats = cache.stats();
    assert_eq!(stats.disk_hits, 1);

    // Second read is a memory hit
    cache.get(&k).await.unwrap();
    assert_eq!(cache.stats().memory_hits, 1);
}

#[tokio::test]
async fn test_cleared_memory_tier_is_repopulated_from_disk() {
    let temp_dir = TempDir::new().unwrap();
    let cache = create_cache(&temp_dir.path().join("media"));
    let k = key("p/a.jpg");

    cache.set(&k, Asset::for_key(&k, b"B".to_vec())).await;
    cache.memory().clear();

    assert_eq!(cache.get(&k).await.unwrap().bytes().as_ref(), b"B");
    assert!(cache.memory().get(&k).is_some());
}

#[tokio::test]
async fn test_failed_disk_write_still_serves_from_memory() {
    let temp_dir = TempDir::new().unwrap();
    // A regular file where the cache directory should be makes every write fail
    let unwritable = temp_dir.path().join("media");
    std::fs::write(&unwritable, b"not a directory").unwrap();
    let cache = create_cache(&unwritable);
    let k = key("p/a.jpg");

    cache.set(&k, Asset::for_key(&k, b"B".to_vec())).await;

    let asset = cache.get(&k).await.expect("memory copy survives");
    assert_eq!(asset.bytes().as_ref(), b"B");
    assert!(cache.disk().get(&k).is_err() || cache.disk().get(&k).unwrap().is_none());
    assert_eq!(cache.stats().disk_write_failures, 1);
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let temp_dir = TempDir::new().unwrap();
    let cache = create_cache(&temp_dir.path().join("media"));

    for i in 0..3 {
        let k = key(&format!("p/{}.jpg", i));
        cache.set(&k, Asset::for_key(&k, vec![i as u8; 16])).await;
    }

    assert_eq!(cache.clear().await, 3);
    for i in 0..3 {
        assert!(cache.get(&key(&format!("p/{}.jpg", i))).await.is_none());
    }
}
