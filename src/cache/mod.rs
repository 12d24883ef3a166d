//! Two-tier image caching.
//!
//! # Components
//!
//! - [`CacheKey`]: Opaque content identifier shared by both tiers
//! - [`MemoryCache`]: In-process LRU of decoded images, bounded by pixel bytes
//! - [`DiskCache`]: Persistent LRU of compressed blobs, bounded by bytes on
//!   disk, recovered from a journal on restart
//! - [`ImageCache`]: Both tiers for one namespace behind one API
//! - [`ImageCacheParams`]: Per-namespace configuration

mod disk;
mod journal;
mod key;
mod memory;
mod service;

pub use disk::{DiskCache, DEFAULT_DISK_CACHE_CAPACITY};
pub use key::CacheKey;
pub use memory::{MemoryCache, PutOutcome, DEFAULT_MEMORY_CACHE_CAPACITY};
pub use service::{CacheStats, ImageCache, ImageCacheParams, TierStats, DEFAULT_CACHE_NAME};
