//! Configuration for the thumbcache command line tool.
//!
//! Options come from command-line arguments with `THUMBCACHE_` environment
//! variable fallbacks and sensible defaults.
//!
//! # Environment Variables
//!
//! - `THUMBCACHE_DIR` - Root directory for cache namespaces (default: system temp dir)
//! - `THUMBCACHE_NAME` - Namespace for decoded images (default: thumbs)
//! - `THUMBCACHE_MEMORY_SIZE` - Memory tier capacity (default: 5MB)
//! - `THUMBCACHE_DISK_SIZE` - Disk tier capacity (default: 10MB)
//! - `THUMBCACHE_HTTP_CACHE_SIZE` - Raw download cache capacity, 0 disables (default: 10MB)
//! - `THUMBCACHE_FORMAT` - Disk compression format, jpeg or png (default: jpeg)
//! - `THUMBCACHE_QUALITY` - JPEG quality 1-100 (default: 70)
//! - `THUMBCACHE_MEMORY_CACHE` / `THUMBCACHE_DISK_CACHE` - Enable a tier (default: true)
//! - `THUMBCACHE_CLEAR_ON_START` - Clear the disk tier on open (default: false)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::bitmap::{CompressFormat, TargetSize, DEFAULT_COMPRESS_QUALITY};
use crate::cache::{ImageCacheParams, DEFAULT_CACHE_NAME};
use crate::loader::{LoaderSettings, DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_TARGET_SIZE};
use crate::source::HTTP_CACHE_NAME;

// =============================================================================
// Default Values
// =============================================================================

/// Directory under the system temp dir used when no cache dir is given.
pub const DEFAULT_CACHE_DIR_NAME: &str = "thumbcache";

pub const DEFAULT_MEMORY_SIZE: &str = "5MB";
pub const DEFAULT_DISK_SIZE: &str = "10MB";
pub const DEFAULT_HTTP_CACHE_SIZE: &str = "10MB";

/// Default directory for images written by `load`.
pub const DEFAULT_OUTPUT_DIR: &str = "thumbs";

// =============================================================================
// CLI Arguments
// =============================================================================

/// thumbcache - load, downsample and cache images.
#[derive(Parser, Debug, Clone)]
#[command(name = "thumbcache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load images through the cache and write the results to a directory.
    Load(LoadConfig),

    /// Remove every entry from the cache.
    Clear(CacheArgs),

    /// Print cache entry counts and sizes.
    Stats(CacheArgs),
}

/// Options shared by every subcommand that opens the cache.
#[derive(Args, Debug, Clone)]
pub struct CacheArgs {
    /// Root directory holding the cache namespaces.
    #[arg(long, env = "THUMBCACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Namespace (subdirectory) for decoded images.
    #[arg(long, default_value = DEFAULT_CACHE_NAME, env = "THUMBCACHE_NAME")]
    pub cache_name: String,

    /// Memory tier capacity (e.g. 5MB, 512KB).
    #[arg(long, default_value = DEFAULT_MEMORY_SIZE, env = "THUMBCACHE_MEMORY_SIZE")]
    pub memory_size: String,

    /// Disk tier capacity (e.g. 10MB).
    #[arg(long, default_value = DEFAULT_DISK_SIZE, env = "THUMBCACHE_DISK_SIZE")]
    pub disk_size: String,

    /// Capacity of the raw download cache. 0 disables it.
    #[arg(long, default_value = DEFAULT_HTTP_CACHE_SIZE, env = "THUMBCACHE_HTTP_CACHE_SIZE")]
    pub http_cache_size: String,

    /// Compression format for the disk tier (jpeg or png).
    #[arg(long, default_value = "jpeg", env = "THUMBCACHE_FORMAT")]
    pub format: CompressFormat,

    /// JPEG quality for the disk tier (1-100).
    #[arg(long, default_value_t = DEFAULT_COMPRESS_QUALITY, env = "THUMBCACHE_QUALITY")]
    pub quality: u8,

    /// Keep decoded images in memory.
    #[arg(long, default_value_t = true, env = "THUMBCACHE_MEMORY_CACHE", action = clap::ArgAction::Set)]
    pub memory_cache: bool,

    /// Keep compressed images on disk.
    #[arg(long, default_value_t = true, env = "THUMBCACHE_DISK_CACHE", action = clap::ArgAction::Set)]
    pub disk_cache: bool,

    /// Clear the disk tier when the cache is opened.
    #[arg(long, default_value_t = false, env = "THUMBCACHE_CLEAR_ON_START")]
    pub clear_on_start: bool,
}

/// Options for `load`.
#[derive(Args, Debug, Clone)]
pub struct LoadConfig {
    #[command(flatten)]
    pub cache: CacheArgs,

    /// URLs or file paths to load.
    #[arg(required = true)]
    pub inputs: Vec<String>,

    /// Target width in pixels.
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE, env = "THUMBCACHE_WIDTH")]
    pub width: u32,

    /// Target height in pixels.
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE, env = "THUMBCACHE_HEIGHT")]
    pub height: u32,

    /// Directory the loaded images are written to.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,

    /// Maximum number of concurrent loads.
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENT_TASKS, env = "THUMBCACHE_CONCURRENCY")]
    pub concurrency: usize,
}

impl CacheArgs {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_name.is_empty() {
            return Err("cache_name must not be empty".to_string());
        }
        if self.cache_name == HTTP_CACHE_NAME {
            return Err(format!(
                "cache_name '{}' is reserved for raw downloads",
                HTTP_CACHE_NAME
            ));
        }

        let memory = parse_size(&self.memory_size)?;
        if self.memory_cache && memory == 0 {
            return Err("memory_size must be greater than 0".to_string());
        }
        let disk = parse_size(&self.disk_size)?;
        if self.disk_cache && disk == 0 {
            return Err("disk_size must be greater than 0".to_string());
        }
        parse_size(&self.http_cache_size)?;

        if self.quality == 0 || self.quality > 100 {
            return Err("quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Root directory, falling back to the system temp dir.
    pub fn root_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME))
    }

    /// Build cache parameters. Call [`validate`](Self::validate) first.
    pub fn cache_params(&self) -> Result<ImageCacheParams, String> {
        Ok(ImageCacheParams::new(self.root_dir(), self.cache_name.clone())
            .with_memory_capacity(parse_size(&self.memory_size)? as usize)
            .with_disk_capacity(parse_size(&self.disk_size)?)
            .with_compress_format(self.format)
            .with_compress_quality(self.quality)
            .with_memory_enabled(self.memory_cache)
            .with_disk_enabled(self.disk_cache)
            .with_clear_disk_on_start(self.clear_on_start))
    }

    /// Raw download cache capacity, `None` when disabled.
    pub fn http_cache_capacity(&self) -> Result<Option<u64>, String> {
        let size = parse_size(&self.http_cache_size)?;
        Ok((size > 0).then_some(size))
    }

    pub fn http_cache_dir(&self) -> PathBuf {
        self.root_dir().join(HTTP_CACHE_NAME)
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;

        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings::new(TargetSize::new(self.width, self.height))
            .with_max_concurrent_tasks(self.concurrency)
    }
}

// =============================================================================
// Size Parsing
// =============================================================================

/// Parse a human-readable size ("10MB", "512 KB", "1g", "2048") into bytes.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let invalid = || {
        format!(
            "Invalid size '{}' - expected format like '10MB', '512KB' or '1024'",
            input
        )
    };

    const SUFFIXES: [(&str, u64); 7] = [
        ("GB", 1 << 30),
        ("G", 1 << 30),
        ("MB", 1 << 20),
        ("M", 1 << 20),
        ("KB", 1 << 10),
        ("K", 1 << 10),
        ("B", 1),
    ];

    let upper = input.trim().to_ascii_uppercase();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, multiplier)| {
            upper
                .strip_suffix(suffix)
                .map(|rest| (rest.trim(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1));

    let value: u64 = number.parse().map_err(|_| invalid())?;
    value.checked_mul(multiplier).ok_or_else(invalid)
}

// =============================================================================
// Tests
// =============================================================================
