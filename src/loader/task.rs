//! One load request from miss to delivery.
//!
//! ```text
//! Pending ──permit──▶ Running ──┬──▶ Delivered
//!    │                          ├──▶ Cancelled   (superseded, exit-early, slot gone)
//!    └──cancelled──▶ Cancelled  └──▶ Failed      (fetch or decode error)
//! ```
//!
//! Cancellation is cooperative. The task checks its token and the exit-early
//! flag before the disk lookup, before the fetch and before delivery, but it
//! is never interrupted mid-I/O. A result that arrives after cancellation is
//! still written to the caches; it just isn't shown.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::slot::{ImageSlot, SlotId};
use super::Shared;
use crate::bitmap::DecodedImage;
use crate::cache::CacheKey;
use crate::error::LoadError;
use crate::source::ImageSource;

/// Unique identity of a load task. Distinct from the key it loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Lifecycle of a load task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Waiting for a worker permit
    Pending,
    Running,
    /// The image was shown in the slot
    Delivered,
    /// Superseded, cancelled, exited early, or the slot went away
    Cancelled,
    /// Fetch or decode failed; the slot keeps its placeholder
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Delivered | TaskState::Cancelled | TaskState::Failed
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Delivered => "delivered",
            TaskState::Cancelled => "cancelled",
            TaskState::Failed => "failed",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Task Handle
// =============================================================================

/// Observer for a started task.
///
/// Cloneable; dropping every handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    key: CacheKey,
    slot: SlotId,
    token: CancellationToken,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Most recent state, without waiting.
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Request cancellation. The task stops at its next checkpoint.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the task reaches a terminal state and return it.
    pub async fn finished(&self) -> TaskState {
        let mut state = self.state.clone();
        loop {
            let current = *state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }
}

// =============================================================================
// Load Task
// =============================================================================

pub(super) struct LoadTask {
    id: TaskId,
    key: CacheKey,
    slot_id: SlotId,
    slot: Weak<dyn ImageSlot>,
    token: CancellationToken,
    state: watch::Sender<TaskState>,
}

impl LoadTask {
    pub(super) fn new(
        id: TaskId,
        key: CacheKey,
        slot_id: SlotId,
        slot: Weak<dyn ImageSlot>,
        token: CancellationToken,
    ) -> (Self, TaskHandle) {
        let (state, receiver) = watch::channel(TaskState::Pending);
        let handle = TaskHandle {
            id,
            key: key.clone(),
            slot: slot_id,
            token: token.clone(),
            state: receiver,
        };
        let task = Self {
            id,
            key,
            slot_id,
            slot,
            token,
            state,
        };
        (task, handle)
    }

    /// Drive the task to a terminal state. Never panics on load failure;
    /// errors end as [`TaskState::Failed`] and a log line.
    pub(super) async fn run<S: ImageSource>(self, shared: Arc<Shared<S>>) {
        let outcome = self.execute(&shared).await;

        if outcome != TaskState::Delivered {
            // A dead task must not absorb same-key requests before its row is gone.
            self.token.cancel();
            shared.bindings.release(self.slot_id, self.id);
        }
        debug!(
            task = %self.id,
            key = %self.key,
            slot = %self.slot_id,
            state = %outcome,
            "Load task finished"
        );
        self.state.send_replace(outcome);
    }

    async fn execute<S: ImageSource>(&self, shared: &Shared<S>) -> TaskState {
        let _permit = tokio::select! {
            permit = shared.permits.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(task = %self.id, "Worker pool closed");
                    return TaskState::Failed;
                }
            },
            _ = self.token.cancelled() => return TaskState::Cancelled,
        };
        self.state.send_replace(TaskState::Running);

        let image = match self.resolve(shared).await {
            Ok(Some(image)) => image,
            Ok(None) => return TaskState::Cancelled,
            Err(e) => {
                warn!(task = %self.id, key = %self.key, error = %e, "Image load failed");
                return TaskState::Failed;
            }
        };

        self.deliver(shared, image)
    }

    /// Produce the image: memory, then disk, then the source. `Ok(None)` when
    /// a checkpoint says to stop.
    async fn resolve<S: ImageSource>(
        &self,
        shared: &Shared<S>,
    ) -> Result<Option<DecodedImage>, LoadError> {
        if self.should_abort(shared) {
            return Ok(None);
        }

        let cache = shared.cache.as_ref();
        if let Some(image) = cache.and_then(|c| c.get_from_memory(&self.key)) {
            debug!(task = %self.id, key = %self.key, "Memory cache hit");
            return Ok(Some(image));
        }

        if let Some(cache) = cache {
            if self.should_abort(shared) {
                return Ok(None);
            }
            let disk = Arc::clone(cache);
            let key = self.key.clone();
            let downsampler = shared.downsampler;
            let target = shared.settings.target;
            let hit = tokio::task::spawn_blocking(move || {
                disk.get_from_disk(&key)
                    .map(|image| downsampler.resample(image, target))
            })
            .await
            .map_err(|e| LoadError::Worker(e.to_string()))?;

            if let Some(image) = hit {
                debug!(task = %self.id, key = %self.key, "Disk cache hit");
                if let Some(memory) = cache.memory() {
                    memory.put(self.key.clone(), image.clone());
                }
                return Ok(Some(image));
            }
        }

        if self.should_abort(shared) {
            return Ok(None);
        }
        let image = shared.source.load(&self.key, shared.settings.target).await?;

        if let Some(cache) = cache {
            let cache = Arc::clone(cache);
            let key = self.key.clone();
            let stored = image.clone();
            tokio::task::spawn_blocking(move || cache.add_to_cache(&key, &stored))
                .await
                .map_err(|e| LoadError::Worker(e.to_string()))?;
        }

        Ok(Some(image))
    }

    fn deliver<S: ImageSource>(&self, shared: &Shared<S>, image: DecodedImage) -> TaskState {
        if self.token.is_cancelled() || shared.exit_early() {
            return TaskState::Cancelled;
        }
        let Some(slot) = self.slot.upgrade() else {
            return TaskState::Cancelled;
        };

        if shared
            .bindings
            .deliver_if_current(self.slot_id, self.id, move || slot.show_image(image))
        {
            TaskState::Delivered
        } else {
            TaskState::Cancelled
        }
    }

    fn should_abort<S: ImageSource>(&self, shared: &Shared<S>) -> bool {
        self.token.is_cancelled()
            || shared.exit_early()
            || self.slot.strong_count() == 0
            || !shared.bindings.is_current(self.slot_id, self.id)
    }
}
