use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Opaque identifier for cacheable content (URL, resource name or file path).
///
/// The same key is used for both cache tiers. On disk it maps to a SHA-256
/// hex digest because raw keys are not filesystem-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic, filesystem-safe stem for this key.
    pub fn file_stem(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
