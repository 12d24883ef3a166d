//! Two-tier image cache.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                      ImageCache                        │
//! │                                                        │
//! │   add_to_cache() ──────┬──────────────────┐            │
//! │                        ▼                  ▼            │
//! │   get_from_memory() ┌─────────────┐  ┌─────────────┐   │
//! │         ──────────▶ │ MemoryCache │  │  DiskCache  │   │
//! │                     │ (decoded)   │  │ (compressed)│   │
//! │   get_from_disk()   └─────────────┘  └─────────────┘   │
//! │         ─────────────────────────────────▲             │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! The tiers are independent. A disk hit is not promoted into memory here;
//! the load task decides that.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::disk::{DiskCache, DEFAULT_DISK_CACHE_CAPACITY};
use super::memory::{MemoryCache, PutOutcome, DEFAULT_MEMORY_CACHE_CAPACITY};
use super::CacheKey;
use crate::bitmap::{
    clamp_quality, CompressFormat, DecodedImage, ImageCodec, DEFAULT_COMPRESS_FORMAT,
    DEFAULT_COMPRESS_QUALITY,
};
use crate::error::CacheError;

/// Default namespace for decoded thumbnails.
pub const DEFAULT_CACHE_NAME: &str = "thumbs";

// =============================================================================
// Parameters
// =============================================================================

/// Configuration for one cache namespace.
///
/// Each namespace gets its own directory (`root/unique_name`) and its own
/// memory budget; two [`ImageCache`] instances must never share either.
#[derive(Debug, Clone)]
pub struct ImageCacheParams {
    /// Parent directory for all cache namespaces
    pub root: PathBuf,

    /// Namespace directory name under `root`
    pub unique_name: String,

    /// Memory tier capacity in bytes of decoded pixels
    pub memory_capacity: usize,

    /// Disk tier capacity in bytes of compressed data
    pub disk_capacity: u64,

    /// Format used to compress images for the disk tier
    pub compress_format: CompressFormat,

    /// JPEG quality (1-100)
    pub compress_quality: u8,

    pub memory_enabled: bool,
    pub disk_enabled: bool,

    /// Clear the disk tier when the cache is opened
    pub clear_disk_on_start: bool,
}

impl ImageCacheParams {
    /// Default parameters for namespace `unique_name` under `root`.
    pub fn new(root: impl Into<PathBuf>, unique_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            unique_name: unique_name.into(),
            memory_capacity: DEFAULT_MEMORY_CACHE_CAPACITY,
            disk_capacity: DEFAULT_DISK_CACHE_CAPACITY,
            compress_format: DEFAULT_COMPRESS_FORMAT,
            compress_quality: DEFAULT_COMPRESS_QUALITY,
            memory_enabled: true,
            disk_enabled: true,
            clear_disk_on_start: false,
        }
    }

    pub fn with_memory_capacity(mut self, bytes: usize) -> Self {
        self.memory_capacity = bytes;
        self
    }

    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity = bytes;
        self
    }

    pub fn with_compress_format(mut self, format: CompressFormat) -> Self {
        self.compress_format = format;
        self
    }

    /// Set the JPEG quality; clamped to 1-100.
    pub fn with_compress_quality(mut self, quality: u8) -> Self {
        self.compress_quality = clamp_quality(quality);
        self
    }

    pub fn with_memory_enabled(mut self, enabled: bool) -> Self {
        self.memory_enabled = enabled;
        self
    }

    pub fn with_disk_enabled(mut self, enabled: bool) -> Self {
        self.disk_enabled = enabled;
        self
    }

    pub fn with_clear_disk_on_start(mut self, clear: bool) -> Self {
        self.clear_disk_on_start = clear;
        self
    }

    /// Directory holding this namespace's disk tier.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(&self.unique_name)
    }

    pub fn codec(&self) -> ImageCodec {
        ImageCodec::new(self.compress_format, self.compress_quality)
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters for one cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub bytes: u64,
    pub capacity: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Snapshot of both tiers. A disabled tier reports `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory: Option<TierStats>,
    pub disk: Option<TierStats>,
}

// =============================================================================
// Image Cache
// =============================================================================

/// Memory and disk tiers for one namespace behind a single API.
///
/// Construct once per session and share by `Arc`; nothing here is global.
///
/// # Example
///
/// ```no_run
/// use thumbcache::cache::{CacheKey, ImageCache, ImageCacheParams};
///
/// let params = ImageCacheParams::new("/tmp/thumbcache", "thumbs")
///     .with_memory_capacity(8 * 1024 * 1024);
/// let cache = ImageCache::open(&params)?;
///
/// let key = CacheKey::from("https://example.com/cat.jpg");
/// if cache.get_from_memory(&key).is_none() {
///     // fall back to cache.get_from_disk(&key), then the network
/// }
/// # Ok::<(), thumbcache::error::CacheError>(())
/// ```
pub struct ImageCache {
    memory: Option<MemoryCache>,
    disk: Option<DiskCache>,
}

impl ImageCache {
    /// Open the tiers enabled in `params`.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk tier is enabled and its directory cannot
    /// be created or read.
    pub fn open(params: &ImageCacheParams) -> Result<Self, CacheError> {
        let memory = params
            .memory_enabled
            .then(|| MemoryCache::with_capacity(params.memory_capacity));

        let disk = if params.disk_enabled {
            let disk =
                DiskCache::open_with_codec(params.cache_dir(), params.disk_capacity, params.codec())?;
            if params.clear_disk_on_start {
                disk.clear()?;
            }
            Some(disk)
        } else {
            None
        };

        info!(
            name = %params.unique_name,
            memory = ?params.memory_enabled.then_some(params.memory_capacity),
            disk = ?params.disk_enabled.then_some(params.disk_capacity),
            format = %params.compress_format,
            quality = params.compress_quality,
            "Image cache opened"
        );

        Ok(Self { memory, disk })
    }

    /// Build a cache from tiers constructed elsewhere.
    pub fn from_tiers(memory: Option<MemoryCache>, disk: Option<DiskCache>) -> Self {
        Self { memory, disk }
    }

    /// Store `image` in every enabled tier.
    ///
    /// Tier failures are logged and swallowed: a write that fails is simply
    /// not cached.
    pub fn add_to_cache(&self, key: &CacheKey, image: &DecodedImage) {
        if let Some(memory) = &self.memory {
            if memory.put(key.clone(), image.clone()) == PutOutcome::TooLarge {
                debug!(key = %key, bytes = image.byte_size(), "Not kept in memory cache");
            }
        }

        if let Some(disk) = &self.disk {
            if disk.contains(key) {
                return;
            }
            match disk.put(key, image) {
                Ok(_) => {}
                Err(e @ CacheError::CapacityExceeded { .. }) => {
                    debug!(key = %key, error = %e, "Not kept in disk cache");
                }
                Err(e) => warn!(key = %key, error = %e, "Disk cache write dropped"),
            }
        }
    }

    /// Look up the memory tier. Never blocks on I/O.
    pub fn get_from_memory(&self, key: &CacheKey) -> Option<DecodedImage> {
        self.memory.as_ref()?.get(key)
    }

    /// Look up the disk tier. Performs blocking file I/O.
    ///
    /// Read failures are reported as a miss.
    pub fn get_from_disk(&self, key: &CacheKey) -> Option<DecodedImage> {
        match self.disk.as_ref()?.get(key) {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache read failed, treating as miss");
                None
            }
        }
    }

    /// Empty both tiers.
    pub fn clear_caches(&self) -> Result<(), CacheError> {
        if let Some(memory) = &self.memory {
            memory.evict_all();
        }
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn memory(&self) -> Option<&MemoryCache> {
        self.memory.as_ref()
    }

    pub fn disk(&self) -> Option<&DiskCache> {
        self.disk.as_ref()
    }

    pub fn disk_dir(&self) -> Option<&Path> {
        self.disk.as_ref().map(|d| d.directory())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory: self.memory.as_ref().map(|m| TierStats {
                entries: m.len(),
                bytes: m.size() as u64,
                capacity: m.capacity() as u64,
                hits: m.hits(),
                misses: m.misses(),
            }),
            disk: self.disk.as_ref().map(|d| TierStats {
                entries: d.len(),
                bytes: d.size(),
                capacity: d.capacity(),
                hits: d.hits(),
                misses: d.misses(),
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
