//! Two-tier cache integration tests.
//!
//! These exercise the facade over real directories: durability across
//! restarts, idempotent puts and LRU eviction under byte budgets.

use std::sync::Arc;

use tempfile::TempDir;
use thumbcache::bitmap::CompressFormat;
use thumbcache::cache::{CacheKey, DiskCache, ImageCache, ImageCacheParams, MemoryCache};

use super::test_utils::{first_pixel, gray_image, image_of_size};

fn params(dir: &TempDir) -> ImageCacheParams {
    ImageCacheParams::new(dir.path(), "thumbs").with_compress_format(CompressFormat::Png)
}

// =============================================================================
// Durability
// =============================================================================

#[test]
fn test_disk_tier_survives_restart() {
    let dir = TempDir::new().unwrap();
    let key = CacheKey::from("https://example.com/a.jpg");

    {
        let cache = ImageCache::open(&params(&dir)).unwrap();
        cache.add_to_cache(&key, &gray_image(24, 16, 99));
        assert!(cache.get_from_memory(&key).is_some());
    }

    let cache = ImageCache::open(&params(&dir)).unwrap();
    assert!(cache.get_from_memory(&key).is_none());

    let restored = cache.get_from_disk(&key).unwrap();
    assert_eq!(restored.dimensions(), (24, 16));
    assert_eq!(first_pixel(&restored), 99);
}

#[test]
fn test_clear_on_start_discards_disk_tier() {
    let dir = TempDir::new().unwrap();
    let key = CacheKey::from("a");

    {
        let cache = ImageCache::open(&params(&dir)).unwrap();
        cache.add_to_cache(&key, &gray_image(8, 8, 1));
    }

    let cache = ImageCache::open(&params(&dir).with_clear_disk_on_start(true)).unwrap();
    assert!(cache.get_from_disk(&key).is_none());
    assert_eq!(cache.stats().disk.unwrap().entries, 0);
}

#[test]
fn test_namespaces_do_not_share_entries() {
    let dir = TempDir::new().unwrap();
    let key = CacheKey::from("shared-key");

    let thumbs = ImageCache::open(&params(&dir)).unwrap();
    let large = ImageCache::open(&ImageCacheParams::new(dir.path(), "large")).unwrap();

    thumbs.add_to_cache(&key, &gray_image(8, 8, 1));
    assert!(large.get_from_memory(&key).is_none());
    assert!(large.get_from_disk(&key).is_none());
    assert_ne!(thumbs.disk_dir(), large.disk_dir());
}

// =============================================================================
// Idempotent Puts
// =============================================================================

#[test]
fn test_second_add_keeps_first_image() {
    let dir = TempDir::new().unwrap();
    let cache = ImageCache::open(&params(&dir)).unwrap();
    let key = CacheKey::from("a");

    let first = gray_image(8, 8, 10);
    cache.add_to_cache(&key, &first);
    cache.add_to_cache(&key, &gray_image(8, 8, 200));

    let memory = cache.get_from_memory(&key).unwrap();
    assert!(memory.ptr_eq(&first));

    let disk = cache.get_from_disk(&key).unwrap();
    assert_eq!(first_pixel(&disk), 10);

    let stats = cache.stats();
    assert_eq!(stats.memory.unwrap().entries, 1);
    assert_eq!(stats.disk.unwrap().entries, 1);
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_memory_eviction_follows_access_order() {
    // Five 100-byte images into a 300-byte tier, touching A before D arrives.
    let cache = ImageCache::from_tiers(Some(MemoryCache::with_capacity(300)), None);
    let keys: Vec<CacheKey> = ["A", "B", "C", "D", "E"]
        .iter()
        .map(|k| CacheKey::from(*k))
        .collect();

    for key in &keys[..3] {
        cache.add_to_cache(key, &image_of_size(100, 0));
    }
    assert!(cache.get_from_memory(&keys[0]).is_some());

    cache.add_to_cache(&keys[3], &image_of_size(100, 0));
    assert!(cache.get_from_memory(&keys[1]).is_none());

    cache.add_to_cache(&keys[4], &image_of_size(100, 0));

    let present: Vec<&str> = keys
        .iter()
        .filter(|key| cache.memory().unwrap().contains(key))
        .map(|key| key.as_str())
        .collect();
    assert_eq!(present, vec!["A", "D", "E"]);
    assert_eq!(cache.stats().memory.unwrap().bytes, 300);
}

#[test]
fn test_oversized_image_skips_memory_only() {
    let dir = TempDir::new().unwrap();
    let cache = ImageCache::open(&params(&dir).with_memory_capacity(50)).unwrap();
    let key = CacheKey::from("big");

    cache.add_to_cache(&key, &image_of_size(100, 3));
    assert!(cache.get_from_memory(&key).is_none());
    assert!(cache.get_from_disk(&key).is_some());
}

#[test]
fn test_disk_budget_holds_across_restart() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("raw");

    {
        let disk = DiskCache::open(&cache_dir, 1000).unwrap();
        for i in 0..8 {
            disk.put_bytes(&CacheKey::from(format!("k{}", i)), &[i as u8; 300])
                .unwrap();
            assert!(disk.size() <= 1000);
        }
        assert_eq!(disk.len(), 3);
    }

    // A smaller budget on reopen trims the oldest entries first.
    let disk = DiskCache::open(&cache_dir, 600).unwrap();
    assert_eq!(disk.len(), 2);
    assert!(disk.contains(&CacheKey::from("k6")));
    assert!(disk.contains(&CacheKey::from("k7")));
    assert!(!disk.contains(&CacheKey::from("k5")));
}

#[test]
fn test_clear_empties_both_tiers() {
    let dir = TempDir::new().unwrap();
    let cache = ImageCache::open(&params(&dir)).unwrap();
    for i in 0..4 {
        cache.add_to_cache(&CacheKey::from(format!("k{}", i)), &gray_image(4, 4, i));
    }

    cache.clear_caches().unwrap();

    let stats = cache.stats();
    assert_eq!(stats.memory.unwrap().entries, 0);
    assert_eq!(stats.disk.unwrap().entries, 0);
    assert!(cache.get_from_disk(&CacheKey::from("k0")).is_none());
}

#[test]
fn test_concurrent_adds_from_many_threads() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(ImageCache::open(&params(&dir)).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..10 {
                    // Half the keys collide across threads.
                    let key = CacheKey::from(format!("k{}", (t % 2) * 100 + i));
                    cache.add_to_cache(&key, &gray_image(4, 4, i as u8));
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.memory.unwrap().entries, 20);
    assert_eq!(stats.disk.unwrap().entries, 20);
}

#[test]
fn test_clear_races_writers_and_readers() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().join("raw");
    let disk = Arc::new(DiskCache::open(&cache_dir, 1_000_000).unwrap());
    let keys: Vec<CacheKey> = (0..40).map(|i| CacheKey::from(format!("k{}", i))).collect();
    let keys = Arc::new(keys);

    let mut threads = Vec::new();
    for t in 0..4 {
        let disk = Arc::clone(&disk);
        let keys = Arc::clone(&keys);
        threads.push(std::thread::spawn(move || {
            // Each writer owns ten keys and stores them repeatedly so some
            // writes land after a clear has removed them.
            for _ in 0..5 {
                for key in &keys[t * 10..(t + 1) * 10] {
                    disk.put_bytes(key, &[t as u8; 100]).unwrap();
                }
            }
        }));
    }
    {
        let disk = Arc::clone(&disk);
        let keys = Arc::clone(&keys);
        threads.push(std::thread::spawn(move || {
            for _ in 0..5 {
                for key in keys.iter() {
                    if let Some(bytes) = disk.get_bytes(key).unwrap() {
                        assert_eq!(bytes.len(), 100);
                    }
                }
            }
        }));
    }
    {
        let disk = Arc::clone(&disk);
        threads.push(std::thread::spawn(move || {
            for _ in 0..10 {
                disk.clear().unwrap();
                std::thread::yield_now();
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }

    // Every indexed entry still has its file.
    let stored: Vec<&CacheKey> = keys.iter().filter(|key| disk.contains(key)).collect();
    for key in &stored {
        assert_eq!(disk.get_bytes(key).unwrap().unwrap().len(), 100);
    }
    assert_eq!(disk.len(), stored.len());
    assert_eq!(disk.size(), stored.len() as u64 * 100);

    let len = disk.len();
    drop(disk);
    let reopened = DiskCache::open(&cache_dir, 1_000_000).unwrap();
    assert_eq!(reopened.len(), len);
    assert_eq!(reopened.size(), len as u64 * 100);
}
