//! In-process cache for decoded images.
//!
//! Entries are charged by the byte size of their pixel buffer, not by count.
//! When an insert pushes the total over capacity, least-recently-used entries
//! are evicted synchronously inside `put` until the total fits again.
//!
//! # Thread Safety
//!
//! Recency order and size accounting live behind one mutex, so the capacity
//! invariant holds across concurrent `get`/`put` from any number of workers.
//! Lookups are O(1) and never block on I/O, which makes them safe to call from
//! the UI thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use super::CacheKey;
use crate::bitmap::DecodedImage;

/// Default memory cache capacity: 5MB
pub const DEFAULT_MEMORY_CACHE_CAPACITY: usize = 5 * 1024 * 1024;

/// Result of [`MemoryCache::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The entry was stored, evicting `evicted` older entries.
    Inserted { evicted: usize },

    /// The key was already resident; nothing changed.
    AlreadyPresent,

    /// The entry alone is larger than the whole cache and was not stored.
    TooLarge,
}

struct MemoryState {
    entries: LruCache<CacheKey, DecodedImage>,
    current_size: usize,
}

/// LRU cache for decoded images with byte-size capacity.
///
/// # Example
///
/// ```
/// use thumbcache::cache::{CacheKey, MemoryCache};
/// use thumbcache::bitmap::DecodedImage;
/// use image::{DynamicImage, GrayImage};
///
/// let cache = MemoryCache::with_capacity(1024);
/// let key = CacheKey::from("https://example.com/cat.jpg");
/// let image = DecodedImage::new(DynamicImage::ImageLuma8(GrayImage::new(16, 16)));
///
/// cache.put(key.clone(), image);
/// assert_eq!(cache.get(&key).map(|img| img.byte_size()), Some(256));
/// ```
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a memory cache with the default capacity (5MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CACHE_CAPACITY)
    }

    /// Create a memory cache holding at most `max_size` bytes of pixels.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get an image, marking it as recently used.
    pub fn get(&self, key: &CacheKey) -> Option<DecodedImage> {
        let found = self.lock().entries.get(key).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Check residency without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Store an image.
    ///
    /// A key that is already resident is left untouched. An image larger than
    /// the whole capacity is rejected and the caller keeps its copy.
    pub fn put(&self, key: CacheKey, image: DecodedImage) -> PutOutcome {
        let size = image.byte_size();
        if size > self.max_size {
            debug!(key = %key, size, capacity = self.max_size, "Image too large for memory cache");
            return PutOutcome::TooLarge;
        }

        let mut state = self.lock();
        if state.entries.contains(&key) {
            return PutOutcome::AlreadyPresent;
        }

        state.entries.put(key, image);
        state.current_size += size;

        let mut evicted = 0;
        while state.current_size > self.max_size {
            match state.entries.pop_lru() {
                Some((old_key, old_image)) => {
                    state.current_size = state.current_size.saturating_sub(old_image.byte_size());
                    evicted += 1;
                    debug!(key = %old_key, size = old_image.byte_size(), "Evicted from memory cache");
                }
                None => break,
            }
        }

        PutOutcome::Inserted { evicted }
    }

    /// Remove one entry, returning it if it was resident.
    pub fn remove(&self, key: &CacheKey) -> Option<DecodedImage> {
        let mut state = self.lock();
        let image = state.entries.pop(key)?;
        state.current_size = state.current_size.saturating_sub(image.byte_size());
        Some(image)
    }

    /// Drop every entry.
    pub fn evict_all(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Bytes currently charged against capacity.
    pub fn size(&self) -> usize {
        self.lock().current_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
