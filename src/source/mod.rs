//! Where image bytes come from.
//!
//! An [`ImageSource`] turns a [`CacheKey`] into a [`DecodedImage`] sized for a
//! target. The loader only sees this trait; which concrete source handles a
//! key is decided by its addressing scheme:
//!
//! | Key                          | Source             |
//! |------------------------------|--------------------|
//! | `http://...`, `https://...`  | [`HttpSource`]     |
//! | `res:name`                   | [`ResourceSource`] |
//! | anything else, `file://...`  | [`FileSource`]     |
//!
//! [`SchemeSource`] does that routing.

mod fetcher;
mod file;
mod http;
mod resource;

use std::sync::Arc;

use async_trait::async_trait;

use crate::bitmap::{DecodedImage, TargetSize};
use crate::cache::CacheKey;
use crate::error::{FetchError, LoadError};

pub use fetcher::{Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
pub use file::FileSource;
pub use http::{HttpSource, DEFAULT_HTTP_CACHE_CAPACITY, HTTP_CACHE_NAME};
pub use resource::{ResourceSource, RESOURCE_SCHEME};

/// Produces decoded images for cache keys.
///
/// Implementations run on worker tasks. CPU-heavy decoding should be moved to
/// a blocking thread so it never stalls the async workers.
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    /// Load the content addressed by `key`, sampled down towards `target`.
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError>;
}

#[async_trait]
impl<S: ImageSource + ?Sized> ImageSource for Arc<S> {
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError> {
        (**self).load(key, target).await
    }
}

/// Which source a key is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheme {
    Http,
    Resource,
    File,
}

impl KeyScheme {
    pub fn of(key: &CacheKey) -> Self {
        if key.as_str().starts_with(RESOURCE_SCHEME) {
            return KeyScheme::Resource;
        }
        match url::Url::parse(key.as_str()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => KeyScheme::Http,
            _ => KeyScheme::File,
        }
    }
}

/// Routes each key to the source for its scheme.
///
/// A scheme without a configured source fails with
/// [`FetchError::UnsupportedKey`].
pub struct SchemeSource {
    http: Option<Box<dyn ImageSource>>,
    resources: Option<Arc<ResourceSource>>,
    files: Option<FileSource>,
}

impl SchemeSource {
    /// A router with no sources configured.
    pub fn new() -> Self {
        Self {
            http: None,
            resources: None,
            files: None,
        }
    }

    pub fn with_http(mut self, source: impl ImageSource) -> Self {
        self.http = Some(Box::new(source));
        self
    }

    pub fn with_resources(mut self, resources: Arc<ResourceSource>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_files(mut self, files: FileSource) -> Self {
        self.files = Some(files);
        self
    }
}

impl Default for SchemeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for SchemeSource {
    async fn load(&self, key: &CacheKey, target: TargetSize) -> Result<DecodedImage, LoadError> {
        let unsupported = || LoadError::Fetch(FetchError::UnsupportedKey(key.to_string()));
        match KeyScheme::of(key) {
            KeyScheme::Http => match &self.http {
                Some(source) => source.load(key, target).await,
                None => Err(unsupported()),
            },
            KeyScheme::Resource => match &self.resources {
                Some(source) => source.load(key, target).await,
                None => Err(unsupported()),
            },
            KeyScheme::File => match &self.files {
                Some(source) => source.load(key, target).await,
                None => Err(unsupported()),
            },
        }
    }
}
