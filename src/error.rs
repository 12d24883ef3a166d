use thiserror::Error;

/// Errors raised while fetching raw image bytes from a remote or local origin
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Transport-level failure (connection refused, TLS, timeout, ...)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server answered with a non-success status
    #[error("Unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    /// The addressed resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Local I/O failure while reading the source
    #[error("I/O error: {0}")]
    Io(String),

    /// The key cannot be interpreted by this fetcher
    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),
}

/// Errors raised while probing or decoding image bytes
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The bytes could not be parsed as a supported image
    #[error("Failed to decode image: {message}")]
    Unreadable { message: String },

    /// The source contained no bytes at all
    #[error("Empty image source")]
    EmptySource,

    /// Requested target size has a zero dimension
    #[error("Invalid target size {width}x{height}")]
    InvalidTarget { width: u32, height: u32 },
}

/// Errors raised by the memory or disk cache tiers.
///
/// None of these are fatal to a caller: reads that fail are treated as a miss
/// and writes that fail are dropped.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Disk read/write failure
    #[error("Cache I/O error: {0}")]
    Io(String),

    /// Image could not be compressed for storage
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// Stored bytes could not be decoded back into an image
    #[error("Cached entry is unreadable: {0}")]
    Decode(#[from] DecodeError),

    /// A single item is larger than the whole tier
    #[error("Entry of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CapacityExceeded { size: u64, capacity: u64 },

    /// The journal could not be read or written
    #[error("Journal error: {0}")]
    Journal(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

/// Errors that end a load task in the `Failed` state
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Cache failure: {0}")]
    Cache(#[from] CacheError),

    /// Worker thread panicked or was shut down mid-task
    #[error("Worker failure: {0}")]
    Worker(String),
}
