//! Remote images, with an optional cache of the raw downloads.
//!
//! The raw cache is a separate [`DiskCache`] namespace with its own directory
//! and capacity. It keeps the original bytes, so a later request for the same
//! URL at a different target size is decoded again without touching the
//! network.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::fetcher::Fetcher;
use super::ImageSource;
use crate::bitmap::{DecodedImage, Downsampler, TargetSize};
use crate::cache::{CacheKey, DiskCache};
use crate::error::{CacheError, LoadError};

/// Namespace directory for raw downloads.
pub const HTTP_CACHE_NAME: &str = "http";

/// Default raw download cache capacity: 10MB
pub const DEFAULT_HTTP_CACHE_CAPACITY: u64 = 10 * 1024 * 1024;

/// [`ImageSource`] that downloads through a [`Fetcher`] and decodes the body.
pub struct HttpSource<F> {
    fetcher: F,
    raw_cache: Option<Arc<DiskCache>>,
    downsampler: Downsampler,
}

impl<F: Fetcher> HttpSource<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            raw_cache: None,
            downsampler: Downsampler::new(),
        }
    }

    /// Keep raw downloads in `cache`.
    pub fn with_raw_cache(mut self, cache: Arc<DiskCache>) -> Self {
        self.raw_cache = Some(cache);
        self
    }

    pub fn raw_cache(&self) -> Option<&Arc<DiskCache>> {
        self.raw_cache.as_ref()
    }

    async fn bytes_for(&self, key: &CacheKey) -> Result<Bytes, LoadError> {
        if let Some(cache) = &self.raw_cache {
            let cache = Arc::clone(cache);
            let lookup = key.clone();
            let cached = tokio::task::spawn_blocking(move || cache.get_bytes(&lookup))
                .await
                .map_err(|e| LoadError::Worker(e.to_string()))?;
            match cached {
                Ok(Some(data)) => {
                    debug!(key = %key, "Raw download cache hit");
                    return Ok(data);
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Raw download cache read failed"),
            }
        }

        let data = self.fetcher.fetch(key).await?;

        if let Some(cache) = &self.raw_cache {
            let cache = Arc::clone(cache);
            let store_key = key.clone();
            let body = data.clone();
            let stored = tokio::task::spawn_blocking(move || cache.put_bytes(&store_key, &body))
                .await
                .map_err(|e| LoadError::Worker(e.to_string()))?;
            match stored {
                Ok(_) => {}
                Err(e @ CacheError::CapacityExceeded { .. }) => {
                    debug!(key = %key, error = %e, "Download not kept in raw cache")
                }
                Err(e) => warn!(key = %key, error = %e, "Raw download cache write dropped"),
            }
        }

        Ok(data)
    }

    /// Drop an undecodable download so the next request fetches again.
    async fn forget_raw(&self, key: &CacheKey) {
        let Some(cache) = &self.raw_cache else {
            return;
        };
        let cache = Arc::clone(cache);
        let stale = key.clone();
        match tokio::task::spawn_blocking(move || cache.remove(&stale)).await {
            Ok(Ok(true)) => debug!(key = %key, "Dropped undecodable download from raw cache"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to drop undecodable download"),
            Err(e) => warn!(key = %key, error = %e, "Failed to drop undecodable download"),
        }
    }
}

#[async_trait]
impl<F: Fetcher> ImageSource for HttpSource<F> {
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError> {
        let data = self.bytes_for(key).await?;
        let downsampler = self.downsampler;
        let decoded =
            tokio::task::spawn_blocking(move || downsampler.decode_sampled(&data, target))
                .await
                .map_err(|e| LoadError::Worker(e.to_string()))?;

        match decoded {
            Ok(image) => Ok(image),
            Err(e) => {
                self.forget_raw(key).await;
                Err(e.into())
            }
        }
    }
}
