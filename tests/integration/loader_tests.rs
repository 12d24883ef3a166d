//! Loader integration tests.
//!
//! A [`ScriptedSource`] holds loads open so each test can decide the order in
//! which tasks finish, then checks what the slots ended up showing.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use thumbcache::bitmap::{CompressFormat, TargetSize};
use thumbcache::cache::{CacheKey, ImageCache, ImageCacheParams, MemoryCache};
use thumbcache::loader::{
    ImageLoader, ImageSlot, LoadRequest, LoaderSettings, TaskHandle, TaskState,
};
use tokio::runtime::Handle;

use super::test_utils::{first_pixel, gray_image, RecordingSlot, ScriptedSource, Shown};

const A: &str = "https://example.com/a.png";
const B: &str = "https://example.com/b.png";

fn settings() -> LoaderSettings {
    LoaderSettings::new(TargetSize::square(16))
}

fn memory_only() -> Arc<ImageCache> {
    Arc::new(ImageCache::from_tiers(Some(MemoryCache::new()), None))
}

fn new_loader(
    source: Arc<ScriptedSource>,
    cache: Arc<ImageCache>,
) -> ImageLoader<Arc<ScriptedSource>> {
    ImageLoader::new(source, Some(cache), settings(), Handle::current())
}

fn two_images() -> ScriptedSource {
    ScriptedSource::new()
        .with_image(A, gray_image(16, 16, 1))
        .with_image(B, gray_image(16, 16, 2))
}

fn started(request: LoadRequest) -> TaskHandle {
    match request {
        LoadRequest::Started(handle) => handle,
        other => panic!("expected a started task, got {:?}", other),
    }
}

/// Keep opening `key`'s gate until `handle` reaches a terminal state.
async fn release_until_finished(
    source: &ScriptedSource,
    key: &str,
    handle: &TaskHandle,
) -> TaskState {
    loop {
        source.open(key);
        let waited = tokio::time::timeout(Duration::from_millis(20), handle.finished()).await;
        if let Ok(state) = waited {
            return state;
        }
    }
}

// =============================================================================
// Last Request Wins
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recycled_slot_shows_latest_when_old_finishes_last() {
    let source = Arc::new(two_images().gated(A).gated(B));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let first = started(loader.load_image(A, &slot));
    let second = started(loader.load_image(B, &slot));
    assert!(first.is_cancelled());

    source.open(B);
    assert_eq!(second.finished().await, TaskState::Delivered);

    source.open(A);
    assert_eq!(first.finished().await, TaskState::Cancelled);

    let images = slot.images();
    assert_eq!(images.len(), 1);
    assert!(images[0].ptr_eq(&source.image(B)));
    assert_eq!(slot.placeholder_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recycled_slot_shows_latest_when_old_finishes_first() {
    let source = Arc::new(two_images().gated(A).gated(B));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let first = started(loader.load_image(A, &slot));
    let second = started(loader.load_image(B, &slot));

    source.open(A);
    assert_eq!(first.finished().await, TaskState::Cancelled);
    assert!(slot.images().is_empty());

    source.open(B);
    assert_eq!(second.finished().await, TaskState::Delivered);
    assert!(slot.last_image().unwrap().ptr_eq(&source.image(B)));
    assert_eq!(slot.images().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_key_does_not_start_second_task() {
    let source = Arc::new(two_images().gated(A));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let handle = started(loader.load_image(A, &slot));
    match loader.load_image(A, &slot) {
        LoadRequest::InFlight(id) => assert_eq!(id, handle.id()),
        other => panic!("expected in-flight, got {:?}", other),
    }
    assert_eq!(slot.placeholder_count(), 1);

    source.open(A);
    assert_eq!(handle.finished().await, TaskState::Delivered);
    assert_eq!(source.load_count(A), 1);
    assert_eq!(loader.active_slots(), 0);

    // Now in memory: served without a task.
    assert!(matches!(loader.load_image(A, &slot), LoadRequest::MemoryHit));
    assert_eq!(slot.images().len(), 2);
    assert_eq!(source.load_count(A), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slots_load_independently() {
    let source = Arc::new(two_images().gated(A).gated(B));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let left = RecordingSlot::new(1);
    let right = RecordingSlot::new(2);

    let a = started(loader.load_image(A, &left));
    let b = started(loader.load_image(B, &right));
    assert_eq!(loader.active_slots(), 2);

    source.open(B);
    source.open(A);
    assert_eq!(a.finished().await, TaskState::Delivered);
    assert_eq!(b.finished().await, TaskState::Delivered);

    assert_eq!(first_pixel(&left.last_image().unwrap()), 1);
    assert_eq!(first_pixel(&right.last_image().unwrap()), 2);
}

// =============================================================================
// Placeholders and Memory Hits
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loading_image_shown_while_pending() {
    let source = Arc::new(two_images().gated(A));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let placeholder = gray_image(16, 16, 128);
    loader.set_loading_image(Some(placeholder.clone()));
    let slot = RecordingSlot::new(1);

    let handle = started(loader.load_image(A, &slot));
    match slot.shown().as_slice() {
        [Shown::Placeholder(Some(shown))] => assert!(shown.ptr_eq(&placeholder)),
        other => panic!("unexpected slot history: {:?}", other),
    }

    source.open(A);
    assert_eq!(handle.finished().await, TaskState::Delivered);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_memory_hit_is_shown_without_task() {
    let source = Arc::new(ScriptedSource::new());
    let cache = memory_only();
    let image = gray_image(16, 16, 7);
    cache.add_to_cache(&CacheKey::from(A), &image);

    let loader = new_loader(Arc::clone(&source), cache);
    let slot = RecordingSlot::new(1);

    assert!(matches!(loader.load_image(A, &slot), LoadRequest::MemoryHit));
    match slot.shown().as_slice() {
        [Shown::Image(shown)] => assert!(shown.ptr_eq(&image)),
        other => panic!("unexpected slot history: {:?}", other),
    }
    assert_eq!(source.total_loads(), 0);
    assert_eq!(loader.active_slots(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_memory_hit_cancels_pending_load() {
    let source = Arc::new(two_images().gated(B));
    let cache = memory_only();
    let cached = gray_image(16, 16, 9);
    cache.add_to_cache(&CacheKey::from(A), &cached);

    let loader = new_loader(Arc::clone(&source), cache);
    let slot = RecordingSlot::new(1);

    let pending = started(loader.load_image(B, &slot));
    assert!(matches!(loader.load_image(A, &slot), LoadRequest::MemoryHit));
    assert!(pending.is_cancelled());

    source.open(B);
    assert_eq!(pending.finished().await, TaskState::Cancelled);
    assert!(slot.last_image().unwrap().ptr_eq(&cached));
    assert_eq!(slot.images().len(), 1);
}

// =============================================================================
// Disk Tier
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disk_hit_after_restart_skips_source() {
    let dir = TempDir::new().unwrap();
    let params =
        ImageCacheParams::new(dir.path(), "thumbs").with_compress_format(CompressFormat::Png);

    {
        let source = Arc::new(two_images());
        let cache = Arc::new(ImageCache::open(&params).unwrap());
        let loader = new_loader(Arc::clone(&source), cache);
        let slot = RecordingSlot::new(1);
        let handle = started(loader.load_image(A, &slot));
        assert_eq!(handle.finished().await, TaskState::Delivered);
    }

    // Fresh memory tier; the source no longer knows A.
    let source = Arc::new(ScriptedSource::new());
    let cache = Arc::new(ImageCache::open(&params).unwrap());
    let loader = new_loader(Arc::clone(&source), Arc::clone(&cache));
    let slot = RecordingSlot::new(1);

    let handle = started(loader.load_image(A, &slot));
    assert_eq!(handle.finished().await, TaskState::Delivered);

    let shown = slot.last_image().unwrap();
    assert_eq!(shown.dimensions(), (16, 16));
    assert_eq!(first_pixel(&shown), 1);
    assert_eq!(source.total_loads(), 0);

    // The disk hit was promoted to memory.
    assert!(cache.get_from_memory(&CacheKey::from(A)).is_some());
}

// =============================================================================
// Cancellation and Failure
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_load_keeps_placeholder() {
    let source = Arc::new(ScriptedSource::new());
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let handle = started(loader.load_image("https://example.com/missing.png", &slot));
    assert_eq!(handle.finished().await, TaskState::Failed);

    assert!(slot.images().is_empty());
    assert_eq!(slot.placeholder_count(), 1);
    assert_eq!(loader.active_slots(), 0);

    // Nothing was cached, so a retry goes back to the source.
    let retry = started(loader.load_image("https://example.com/missing.png", &slot));
    assert_eq!(retry.finished().await, TaskState::Failed);
    assert_eq!(source.total_loads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_work_stops_delivery() {
    let source = Arc::new(two_images().gated(A));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(4);

    let handle = started(loader.load_image(A, &slot));
    assert_eq!(loader.cancel_work(slot.slot_id()), Some(handle.id()));
    assert_eq!(loader.cancel_work(slot.slot_id()), None);

    source.open(A);
    assert_eq!(handle.finished().await, TaskState::Cancelled);
    assert!(slot.images().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_task_does_not_absorb_same_key() {
    let source = Arc::new(two_images().gated(A));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let first = started(loader.load_image(A, &slot));
    first.cancel();

    // Same key again: a fresh task, not the cancelled one.
    let second = started(loader.load_image(A, &slot));
    assert_ne!(second.id(), first.id());
    let current = loader.current_task(slot.slot_id()).map(|(id, _)| id);
    assert_eq!(current, Some(second.id()));

    assert_eq!(release_until_finished(&source, A, &second).await, TaskState::Delivered);
    assert_eq!(release_until_finished(&source, A, &first).await, TaskState::Cancelled);

    assert_eq!(slot.images().len(), 1);
    assert!(slot.last_image().unwrap().ptr_eq(&source.image(A)));
    assert_eq!(loader.active_slots(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exit_early_skips_delivery() {
    let source = Arc::new(two_images().gated(A));
    let loader = new_loader(Arc::clone(&source), memory_only());
    let slot = RecordingSlot::new(1);

    let handle = started(loader.load_image(A, &slot));
    loader.set_exit_tasks_early(true);
    source.open(A);
    assert_eq!(handle.finished().await, TaskState::Cancelled);
    assert!(slot.images().is_empty());

    loader.set_exit_tasks_early(false);
    source.open(A);
    match loader.load_image(A, &slot) {
        // The first task may have finished its fetch before it noticed the flag.
        LoadRequest::MemoryHit => {}
        LoadRequest::Started(retry) => assert_eq!(retry.finished().await, TaskState::Delivered),
        LoadRequest::InFlight(_) => panic!("slot should have been released"),
    }
    assert!(slot.last_image().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_slot_is_not_delivered() {
    let source = Arc::new(two_images().gated(A));
    let cache = memory_only();
    let loader = new_loader(Arc::clone(&source), Arc::clone(&cache));

    let slot = RecordingSlot::new(1);
    let handle = started(loader.load_image(A, &slot));
    drop(slot);

    source.open(A);
    assert_eq!(handle.finished().await, TaskState::Cancelled);
    assert_eq!(loader.active_slots(), 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_limit_bounds_concurrent_loads() {
    let mut source = ScriptedSource::new().with_delay(Duration::from_millis(20));
    let keys: Vec<String> = (0..8).map(|i| format!("https://example.com/{}.png", i)).collect();
    for (i, key) in keys.iter().enumerate() {
        source = source.with_image(key, gray_image(16, 16, i as u8));
    }
    let source = Arc::new(source);

    let loader = ImageLoader::new(
        Arc::clone(&source),
        Some(memory_only()),
        settings().with_max_concurrent_tasks(2),
        Handle::current(),
    );

    let slots: Vec<_> = (0..keys.len() as u64).map(RecordingSlot::new).collect();
    let handles: Vec<_> = keys
        .iter()
        .zip(&slots)
        .map(|(key, slot)| started(loader.load_image(key.as_str(), slot)))
        .collect();

    for handle in &handles {
        assert_eq!(handle.finished().await, TaskState::Delivered);
    }
    assert!(source.max_in_flight() <= 2);
    assert_eq!(source.total_loads(), keys.len());

    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(first_pixel(&slot.last_image().unwrap()), i as u8);
    }
}
