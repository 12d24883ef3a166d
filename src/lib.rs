//! # thumbcache
//!
//! Asynchronous image loading for UIs that recycle their display slots.
//!
//! Images are fetched from the network, local files or bundled resources,
//! decoded at the smallest integer scale that still covers the requested
//! display size, and kept in a two-tier cache so the same work is never done
//! twice. Slots are recycled faster than loads finish, so every load is bound
//! to the slot that asked for it and only the slot's latest request is ever
//! shown.
//!
//! ## Features
//!
//! - **Sampled decoding**: Header-only dimension read, then decode at a divisor that
//!   keeps the aspect ratio and never undershoots the request
//! - **Memory tier**: LRU of decoded images bounded by pixel bytes
//! - **Disk tier**: LRU of compressed images bounded by bytes on disk, with
//!   atomic writes and journal recovery across restarts
//! - **Last request wins**: Superseded loads are cancelled and can never
//!   overwrite a slot that moved on
//!
//! ## Architecture
//!
//! - [`bitmap`] - Decoded images, sample-size calculation and the disk codec
//! - [`cache`] - Memory tier, disk tier and the two-tier facade
//! - [`source`] - HTTP, file and resource image sources
//! - [`loader`] - Load tasks, slot binding and cancellation
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use thumbcache::{
//!     DecodedImage, FileSource, ImageCache, ImageCacheParams, ImageLoader, ImageSlot,
//!     LoaderSettings, SlotId,
//! };
//!
//! struct Cell(u64);
//!
//! impl ImageSlot for Cell {
//!     fn slot_id(&self) -> SlotId {
//!         SlotId::new(self.0)
//!     }
//!     fn show_placeholder(&self, _placeholder: Option<&DecodedImage>) {}
//!     fn show_image(&self, image: DecodedImage) {
//!         println!("cell {} shows {}x{}", self.0, image.width(), image.height());
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = ImageCache::open(&ImageCacheParams::new("/tmp/thumbcache", "thumbs"))?;
//!     let loader = ImageLoader::new(
//!         FileSource::new(),
//!         Some(Arc::new(cache)),
//!         LoaderSettings::default(),
//!         tokio::runtime::Handle::current(),
//!     );
//!
//!     let cell = Arc::new(Cell(0));
//!     if let Some(handle) = loader.load_image("photos/cat.jpg", &cell).handle() {
//!         handle.finished().await;
//!     }
//!     Ok(())
//! }
//! ```

pub mod bitmap;
pub mod cache;
pub mod config;
pub mod error;
pub mod loader;
pub mod source;

// Re-export commonly used types
pub use bitmap::{calculate_sample_size, CompressFormat, DecodedImage, Downsampler, TargetSize};
pub use cache::{
    CacheKey, CacheStats, DiskCache, ImageCache, ImageCacheParams, MemoryCache, PutOutcome,
};
pub use config::{CacheArgs, Cli, Command, LoadConfig};
pub use error::{CacheError, DecodeError, FetchError, LoadError};
pub use loader::{
    ImageLoader, ImageSlot, LoadRequest, LoaderSettings, SlotId, TaskHandle, TaskId, TaskState,
};
pub use source::{
    FileSource, Fetcher, HttpFetcher, HttpSource, ImageSource, ResourceSource, SchemeSource,
};
