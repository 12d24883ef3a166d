//! Slot identity and the slot to task binding table.
//!
//! Slots are recycled: the same slot is rebound to new content long before an
//! old load finishes. The table maps each slot to the one task allowed to fill
//! it. Neither side owns the other. A slot that goes away simply stops being
//! upgradable from the task's `Weak`, and a task that finishes removes its
//! own row.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use super::task::TaskId;
use crate::bitmap::DecodedImage;
use crate::cache::CacheKey;

/// Stable identity of a display slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// A reusable display target, such as a grid cell.
///
/// Callbacks may run on a worker thread. They must not call back into the
/// loader.
pub trait ImageSlot: Send + Sync + 'static {
    /// Identity used to look up the slot's current task.
    fn slot_id(&self) -> SlotId;

    /// Show placeholder content while a load is in flight. `None` means no
    /// loading image is configured.
    fn show_placeholder(&self, placeholder: Option<&DecodedImage>);

    /// Show a finished image.
    fn show_image(&self, image: DecodedImage);
}

// =============================================================================
// Binding Table
// =============================================================================

#[derive(Debug)]
struct Binding {
    task: TaskId,
    key: CacheKey,
    token: CancellationToken,
}

/// Result of [`SlotBindings::bind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BindOutcome {
    /// The new task is now current. `superseded` was cancelled.
    Bound { superseded: Option<TaskId> },

    /// A task for the same key already owns the slot and keeps running.
    AlreadyLoading(TaskId),
}

#[derive(Debug, Default)]
pub(crate) struct SlotBindings {
    slots: Mutex<HashMap<SlotId, Binding>>,
}

impl SlotBindings {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make `task` the current task for `slot`, unless a live task for the
    /// same key already is. A current task for a different key is cancelled.
    ///
    /// A cancelled task still holding its row is replaced even for the same
    /// key, since it will never deliver.
    pub(crate) fn bind(
        &self,
        slot: SlotId,
        task: TaskId,
        key: &CacheKey,
        token: &CancellationToken,
    ) -> BindOutcome {
        let mut slots = self.lock();

        if let Some(current) = slots.get(&slot) {
            if current.key == *key && !current.token.is_cancelled() {
                return BindOutcome::AlreadyLoading(current.task);
            }
        }

        let superseded = slots
            .insert(
                slot,
                Binding {
                    task,
                    key: key.clone(),
                    token: token.clone(),
                },
            )
            .map(|old| {
                old.token.cancel();
                old.task
            });

        BindOutcome::Bound { superseded }
    }

    /// Current task and key for `slot`.
    pub(crate) fn current(&self, slot: SlotId) -> Option<(TaskId, CacheKey)> {
        self.lock()
            .get(&slot)
            .map(|binding| (binding.task, binding.key.clone()))
    }

    pub(crate) fn is_current(&self, slot: SlotId, task: TaskId) -> bool {
        self.lock()
            .get(&slot)
            .is_some_and(|binding| binding.task == task)
    }

    /// Cancel and remove whatever task owns `slot`.
    pub(crate) fn unbind(&self, slot: SlotId) -> Option<TaskId> {
        let binding = self.lock().remove(&slot)?;
        binding.token.cancel();
        Some(binding.task)
    }

    /// Remove the row for `slot` if `task` still owns it.
    pub(crate) fn release(&self, slot: SlotId, task: TaskId) -> bool {
        let mut slots = self.lock();
        if slots.get(&slot).is_some_and(|binding| binding.task == task) {
            slots.remove(&slot);
            return true;
        }
        false
    }

    /// Run `deliver` and remove the row, but only if `task` still owns `slot`.
    ///
    /// `deliver` runs under the table lock so no rebind can slip in between
    /// the check and the delivery.
    pub(crate) fn deliver_if_current(
        &self,
        slot: SlotId,
        task: TaskId,
        deliver: impl FnOnce(),
    ) -> bool {
        let mut slots = self.lock();
        match slots.get(&slot) {
            Some(binding) if binding.task == task && !binding.token.is_cancelled() => {
                deliver();
                slots.remove(&slot);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotId, Binding>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
