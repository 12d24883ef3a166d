use std::path::PathBuf;

use async_trait::async_trait;

use super::ImageSource;
use crate::bitmap::{DecodedImage, Downsampler, TargetSize};
use crate::cache::CacheKey;
use crate::error::LoadError;

/// [`ImageSource`] for local files. The key is the file path, optionally as a
/// `file://` URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource {
    downsampler: Downsampler,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve a key to a filesystem path.
pub(crate) fn key_to_path(key: &CacheKey) -> PathBuf {
    match url::Url::parse(key.as_str()) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(url.path())),
        _ => PathBuf::from(key.as_str()),
    }
}

#[async_trait]
impl ImageSource for FileSource {
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError> {
        let path = key_to_path(key);
        let downsampler = self.downsampler;
        tokio::task::spawn_blocking(move || downsampler.decode_sampled_file(&path, target))
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))?
    }
}
