use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::cache::CacheKey;
use crate::error::FetchError;

/// Default request timeout for remote fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("thumbcache/", env!("CARGO_PKG_VERSION"));

/// Retrieves the raw bytes addressed by a cache key.
///
/// Implementations are called from worker tasks and may block on the network.
/// Timeouts and retries are the implementation's business; the loader imposes
/// no deadline of its own.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetch the full body addressed by `key`.
    async fn fetch(&self, key: &CacheKey) -> Result<Bytes, FetchError>;
}

/// [`Fetcher`] for `http` and `https` URLs built on `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    /// Create a fetcher whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<Bytes, FetchError> {
        let url = url::Url::parse(key.as_str())
            .map_err(|e| FetchError::UnsupportedKey(format!("{}: {}", key, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedKey(key.to_string()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Http(format!("Request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(key.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: key.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Http(format!("Failed to read response: {}", e)))?;
        debug!(key = %key, bytes = body.len(), "Fetched remote image");
        Ok(body)
    }
}
