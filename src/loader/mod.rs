//! Asynchronous image loading into recyclable slots.
//!
//! # Architecture
//!
//! ```text
//!   caller thread                        worker runtime
//!  ┌──────────────────────────┐        ┌───────────────────────────────┐
//!  │ load_image(key, slot)    │        │ LoadTask::run                 │
//!  │  1. memory hit? show it  │ spawn  │  permit → memory → disk →     │
//!  │  2. bind slot → task     │──────▶ │  source → cache both tiers →  │
//!  │  3. show placeholder     │        │  deliver if still current     │
//!  └──────────────────────────┘        └───────────────────────────────┘
//!               │                                    │
//!               └──────────▶ SlotBindings ◀──────────┘
//! ```
//!
//! Only the memory lookup and the binding bookkeeping happen on the caller's
//! thread. Everything else runs on the runtime passed to
//! [`ImageLoader::new`], with at most
//! [`LoaderSettings::max_concurrent_tasks`] tasks past the permit at once.
//!
//! # Last request wins
//!
//! Each slot has at most one current task. Requesting a different key for a
//! slot cancels the old task; requesting the same key while it is still
//! loading does nothing. A task shows its image only if it is still the
//! slot's current task at the moment of delivery, so completion order never
//! matters.

mod slot;
mod task;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bitmap::{DecodedImage, Downsampler, TargetSize};
use crate::cache::{CacheKey, ImageCache};
use crate::source::ImageSource;

use slot::{BindOutcome, SlotBindings};
use task::LoadTask;

pub use slot::{ImageSlot, SlotId};
pub use task::{TaskHandle, TaskId, TaskState};

/// Default number of tasks allowed to fetch or decode at the same time.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// Default target size in pixels.
pub const DEFAULT_TARGET_SIZE: u32 = 100;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Size every request is sampled down towards
    pub target: TargetSize,

    /// Upper bound on tasks doing disk, network or decode work at once
    pub max_concurrent_tasks: usize,
}

impl LoaderSettings {
    pub fn new(target: TargetSize) -> Self {
        Self {
            target,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self::new(TargetSize::square(DEFAULT_TARGET_SIZE))
    }
}

/// What [`ImageLoader::load_image`] did with a request.
#[derive(Debug, Clone)]
pub enum LoadRequest {
    /// Served from memory; the slot already shows the image.
    MemoryHit,

    /// A new task was bound to the slot.
    Started(TaskHandle),

    /// The slot's current task already loads this key; nothing started.
    InFlight(TaskId),
}

impl LoadRequest {
    pub fn handle(&self) -> Option<&TaskHandle> {
        match self {
            LoadRequest::Started(handle) => Some(handle),
            _ => None,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

pub(crate) struct Shared<S> {
    source: S,
    cache: Option<Arc<ImageCache>>,
    bindings: SlotBindings,
    permits: Semaphore,
    exit_early: AtomicBool,
    next_task: AtomicU64,
    loading_image: RwLock<Option<DecodedImage>>,
    downsampler: Downsampler,
    settings: LoaderSettings,
}

impl<S> Shared<S> {
    fn exit_early(&self) -> bool {
        self.exit_early.load(Ordering::Acquire)
    }
}

// =============================================================================
// Image Loader
// =============================================================================

/// Loads images into slots through the cache and an [`ImageSource`].
///
/// Cheap to clone; clones share caches, bindings and the worker limit.
///
/// # Example
///
/// ```ignore
/// let loader = ImageLoader::new(source, Some(cache), LoaderSettings::default(), Handle::current());
/// loader.set_loading_image(Some(placeholder));
///
/// // In the grid's bind callback:
/// loader.load_image("https://example.com/cat.jpg", &cell);
///
/// // When the host goes to the background:
/// loader.set_exit_tasks_early(true);
/// ```
pub struct ImageLoader<S> {
    shared: Arc<Shared<S>>,
    runtime: Handle,
}

impl<S> Clone for ImageLoader<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            runtime: self.runtime.clone(),
        }
    }
}

impl<S: ImageSource> ImageLoader<S> {
    /// Create a loader. Tasks are spawned on `runtime`.
    pub fn new(
        source: S,
        cache: Option<Arc<ImageCache>>,
        settings: LoaderSettings,
        runtime: Handle,
    ) -> Self {
        let permits = settings.max_concurrent_tasks.max(1);
        info!(
            target_size = %settings.target,
            max_concurrent_tasks = permits,
            cached = cache.is_some(),
            "Image loader created"
        );

        Self {
            shared: Arc::new(Shared {
                source,
                cache,
                bindings: SlotBindings::new(),
                permits: Semaphore::new(permits),
                exit_early: AtomicBool::new(false),
                next_task: AtomicU64::new(1),
                loading_image: RwLock::new(None),
                downsampler: Downsampler::new(),
                settings,
            }),
            runtime,
        }
    }

    /// Request `key` for `slot`.
    ///
    /// A memory hit is shown immediately and cancels whatever the slot was
    /// loading. Otherwise the slot is bound to a new task and shows the
    /// loading image until the task delivers. Never blocks on I/O.
    pub fn load_image<T: ImageSlot>(&self, key: impl Into<CacheKey>, slot: &Arc<T>) -> LoadRequest {
        let key = key.into();
        let slot_id = slot.slot_id();

        if let Some(image) = self
            .shared
            .cache
            .as_ref()
            .and_then(|cache| cache.get_from_memory(&key))
        {
            if let Some(cancelled) = self.shared.bindings.unbind(slot_id) {
                debug!(slot = %slot_id, task = %cancelled, "Cancelled by memory hit");
            }
            slot.show_image(image);
            return LoadRequest::MemoryHit;
        }

        let id = TaskId::new(self.shared.next_task.fetch_add(1, Ordering::Relaxed));
        let token = CancellationToken::new();
        match self.shared.bindings.bind(slot_id, id, &key, &token) {
            BindOutcome::AlreadyLoading(current) => {
                debug!(slot = %slot_id, task = %current, key = %key, "Already loading");
                return LoadRequest::InFlight(current);
            }
            BindOutcome::Bound {
                superseded: Some(old),
            } => {
                debug!(slot = %slot_id, task = %old, replaced_by = %id, "Superseded load task");
            }
            BindOutcome::Bound { superseded: None } => {}
        }

        slot.show_placeholder(self.loading_image().as_ref());

        let weak = Arc::downgrade(slot);
        let weak: Weak<dyn ImageSlot> = weak;
        let (task, handle) = LoadTask::new(id, key, slot_id, weak, token);
        self.runtime.spawn(task.run(Arc::clone(&self.shared)));

        LoadRequest::Started(handle)
    }

    /// Cancel whatever task owns `slot`. Returns the cancelled task, if any.
    pub fn cancel_work(&self, slot: SlotId) -> Option<TaskId> {
        let cancelled = self.shared.bindings.unbind(slot);
        if let Some(task) = cancelled {
            debug!(slot = %slot, task = %task, "Work cancelled");
        }
        cancelled
    }

    /// Current task and key for `slot`.
    pub fn current_task(&self, slot: SlotId) -> Option<(TaskId, CacheKey)> {
        self.shared.bindings.current(slot)
    }

    /// Number of slots with a task in flight.
    pub fn active_slots(&self) -> usize {
        self.shared.bindings.len()
    }

    /// While set, running and future tasks skip remaining work and never
    /// deliver.
    pub fn set_exit_tasks_early(&self, exit_early: bool) {
        self.shared.exit_early.store(exit_early, Ordering::Release);
        debug!(exit_early, "Exit-early flag changed");
    }

    pub fn exit_tasks_early(&self) -> bool {
        self.shared.exit_early()
    }

    /// Image handed to slots while their load is in flight.
    pub fn set_loading_image(&self, image: Option<DecodedImage>) {
        *self
            .shared
            .loading_image
            .write()
            .unwrap_or_else(PoisonError::into_inner) = image;
    }

    pub fn loading_image(&self) -> Option<DecodedImage> {
        self.shared
            .loading_image
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn image_cache(&self) -> Option<&Arc<ImageCache>> {
        self.shared.cache.as_ref()
    }

    pub fn settings(&self) -> LoaderSettings {
        self.shared.settings
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }
}
