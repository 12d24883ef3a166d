//! thumbcache - load, downsample and cache images from the command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thumbcache::{
    bitmap::DecodedImage,
    cache::{CacheKey, DiskCache, ImageCache},
    config::{CacheArgs, Cli, Command, LoadConfig},
    loader::{ImageLoader, ImageSlot, LoadRequest, SlotId, TaskState},
    source::{FileSource, HttpFetcher, HttpSource, SchemeSource},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Load(config) => run_load(config).await,
        Command::Clear(args) => run_clear(args),
        Command::Stats(args) => run_stats(args),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "thumbcache=debug"
    } else {
        "thumbcache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_cache(args: &CacheArgs) -> Result<ImageCache, String> {
    let params = args.cache_params()?;
    ImageCache::open(&params).map_err(|e| format!("Failed to open cache: {}", e))
}

fn open_http_cache(args: &CacheArgs) -> Result<Option<DiskCache>, String> {
    match args.http_cache_capacity()? {
        Some(capacity) => DiskCache::open(args.http_cache_dir(), capacity)
            .map(Some)
            .map_err(|e| format!("Failed to open download cache: {}", e)),
        None => Ok(None),
    }
}

// =============================================================================
// Load Command
// =============================================================================

/// Slot that writes whatever it is given to a file.
struct OutputSlot {
    id: SlotId,
    path: PathBuf,
    written: AtomicBool,
}

impl ImageSlot for OutputSlot {
    fn slot_id(&self) -> SlotId {
        self.id
    }

    fn show_placeholder(&self, _placeholder: Option<&DecodedImage>) {}

    fn show_image(&self, image: DecodedImage) {
        match image.pixels().save(&self.path) {
            Ok(()) => {
                self.written.store(true, Ordering::Release);
                info!(
                    path = %self.path.display(),
                    width = image.width(),
                    height = image.height(),
                    "Wrote image"
                );
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to write image"),
        }
    }
}

fn output_path(dir: &Path, index: usize, key: &CacheKey) -> PathBuf {
    let stem = key.file_stem();
    dir.join(format!("{:03}-{}.png", index, &stem[..12]))
}

async fn run_load(config: LoadConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    if let Err(e) = std::fs::create_dir_all(&config.output_dir) {
        error!("Failed to create {}: {}", config.output_dir.display(), e);
        return ExitCode::FAILURE;
    }

    let cache = match open_cache(&config.cache) {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let fetcher = match HttpFetcher::new() {
        Ok(fetcher) => fetcher,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut http = HttpSource::new(fetcher);
    match open_http_cache(&config.cache) {
        Ok(Some(raw)) => http = http.with_raw_cache(Arc::new(raw)),
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let source = SchemeSource::new()
        .with_http(http)
        .with_files(FileSource::new());
    let loader = ImageLoader::new(
        source,
        Some(Arc::clone(&cache)),
        config.loader_settings(),
        Handle::current(),
    );

    let mut slots = Vec::with_capacity(config.inputs.len());
    let mut handles = Vec::new();
    for (index, input) in config.inputs.iter().enumerate() {
        let key = CacheKey::from(input.as_str());
        let slot = Arc::new(OutputSlot {
            id: SlotId::new(index as u64),
            path: output_path(&config.output_dir, index, &key),
            written: AtomicBool::new(false),
        });

        match loader.load_image(key, &slot) {
            LoadRequest::Started(handle) => handles.push(handle),
            LoadRequest::MemoryHit | LoadRequest::InFlight(_) => {}
        }
        slots.push(slot);
    }

    let mut failed = 0;
    for handle in &handles {
        match handle.finished().await {
            TaskState::Delivered => {}
            state => {
                warn!(key = %handle.key(), state = %state, "Image not loaded");
                failed += 1;
            }
        }
    }

    let written = slots
        .iter()
        .filter(|slot| slot.written.load(Ordering::Acquire))
        .count();
    let stats = cache.stats();
    info!(
        written,
        failed,
        memory_bytes = stats.memory.map(|m| m.bytes).unwrap_or_default(),
        disk_bytes = stats.disk.map(|d| d.bytes).unwrap_or_default(),
        "Load finished"
    );

    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

// =============================================================================
// Clear Command
// =============================================================================

fn run_clear(args: CacheArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = open_cache(&args).and_then(|cache| {
        cache
            .clear_caches()
            .map_err(|e| format!("Failed to clear cache: {}", e))
    });
    if let Err(e) = result {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    match open_http_cache(&args) {
        Ok(Some(raw)) => {
            if let Err(e) = raw.clear() {
                error!("Failed to clear download cache: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Ok(None) => {}
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    info!(dir = %args.root_dir().display(), "Cache cleared");
    ExitCode::SUCCESS
}

// =============================================================================
// Stats Command
// =============================================================================

fn run_stats(args: CacheArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let cache = match open_cache(&args) {
        Ok(cache) => cache,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let downloads = match open_http_cache(&args) {
        Ok(raw) => raw.map(|raw| {
            serde_json::json!({
                "entries": raw.len(),
                "bytes": raw.size(),
                "capacity": raw.capacity(),
            })
        }),
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = serde_json::json!({
        "dir": args.root_dir(),
        "name": args.cache_name,
        "cache": cache.stats(),
        "downloads": downloads,
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to format stats: {}", e);
            ExitCode::FAILURE
        }
    }
}
