use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use super::ImageSource;
use crate::bitmap::{DecodedImage, Downsampler, TargetSize};
use crate::cache::CacheKey;
use crate::error::{FetchError, LoadError};

/// Key prefix addressing a bundled resource.
pub const RESOURCE_SCHEME: &str = "res:";

/// [`ImageSource`] serving named in-memory assets.
///
/// Keys are `res:<name>`; a bare name is accepted too.
#[derive(Debug, Default)]
pub struct ResourceSource {
    assets: RwLock<HashMap<String, Bytes>>,
    downsampler: Downsampler,
}

impl ResourceSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the encoded bytes for `name`.
    pub fn insert(&self, name: impl Into<String>, data: impl Into<Bytes>) {
        self.assets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), data.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    fn lookup(&self, key: &CacheKey) -> Result<Bytes, FetchError> {
        let name = key
            .as_str()
            .strip_prefix(RESOURCE_SCHEME)
            .unwrap_or(key.as_str());
        self.assets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }
}

#[async_trait]
impl ImageSource for ResourceSource {
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError> {
        let data = self.lookup(key)?;
        let downsampler = self.downsampler;
        let image =
            tokio::task::spawn_blocking(move || downsampler.decode_sampled(&data, target))
                .await
                .map_err(|e| LoadError::Worker(e.to_string()))??;
        Ok(image)
    }
}
