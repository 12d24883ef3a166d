//! Test utilities for integration tests.
//!
//! Provides a scripted image source whose loads can be held open until a test
//! releases them, a slot that records everything it is shown, and helpers for
//! building small images.

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use thumbcache::bitmap::{DecodedImage, TargetSize};
use thumbcache::cache::CacheKey;
use thumbcache::error::{FetchError, LoadError};
use thumbcache::loader::{ImageSlot, SlotId};
use thumbcache::source::ImageSource;

// =============================================================================
// Images
// =============================================================================

/// Grayscale image filled with `value`. One byte per pixel.
pub fn gray_image(width: u32, height: u32, value: u8) -> DecodedImage {
    DecodedImage::new(DynamicImage::ImageLuma8(GrayImage::from_pixel(
        width,
        height,
        Luma([value]),
    )))
}

/// Image whose decoded size is exactly `bytes`.
pub fn image_of_size(bytes: u32, value: u8) -> DecodedImage {
    gray_image(bytes, 1, value)
}

/// First pixel of a grayscale image.
pub fn first_pixel(image: &DecodedImage) -> u8 {
    image.pixels().to_luma8().get_pixel(0, 0).0[0]
}

// =============================================================================
// Scripted Source
// =============================================================================

/// An image source backed by a map of prepared images.
///
/// Keys without an image fail with `NotFound`. A key can be gated, in which
/// case its load waits until [`ScriptedSource::open`] is called for it.
pub struct ScriptedSource {
    images: Mutex<HashMap<String, DecodedImage>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    loads: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Make every load sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_image(self, key: &str, image: DecodedImage) -> Self {
        self.images.lock().unwrap().insert(key.to_string(), image);
        self
    }

    /// Hold loads of `key` until [`ScriptedSource::open`] is called.
    pub fn gated(self, key: &str) -> Self {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Notify::new()));
        self
    }

    /// Release one pending or future load of `key`.
    pub fn open(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(key) {
            gate.notify_one();
        }
    }

    pub fn image(&self, key: &str) -> DecodedImage {
        self.images.lock().unwrap()[key].clone()
    }

    pub fn load_count(&self, key: &str) -> usize {
        self.loads.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().unwrap().values().sum()
    }

    /// Highest number of loads that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for ScriptedSource {
    async fn load(&self, key: &CacheKey, _target: TargetSize) -> Result<DecodedImage, LoadError> {
        *self
            .loads
            .lock()
            .unwrap()
            .entry(key.as_str().to_string())
            .or_default() += 1;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(key.as_str()).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()).into())
    }
}

// =============================================================================
// Recording Slot
// =============================================================================

#[derive(Debug, Clone)]
pub enum Shown {
    Placeholder(Option<DecodedImage>),
    Image(DecodedImage),
}

/// A slot that remembers every call made on it.
pub struct RecordingSlot {
    id: SlotId,
    shown: Mutex<Vec<Shown>>,
}

impl RecordingSlot {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: SlotId::new(id),
            shown: Mutex::new(Vec::new()),
        })
    }

    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }

    /// Images delivered to this slot, oldest first.
    pub fn images(&self) -> Vec<DecodedImage> {
        self.shown()
            .into_iter()
            .filter_map(|shown| match shown {
                Shown::Image(image) => Some(image),
                Shown::Placeholder(_) => None,
            })
            .collect()
    }

    pub fn last_image(&self) -> Option<DecodedImage> {
        self.images().pop()
    }

    pub fn placeholder_count(&self) -> usize {
        self.shown()
            .iter()
            .filter(|shown| matches!(shown, Shown::Placeholder(_)))
            .count()
    }
}

impl ImageSlot for RecordingSlot {
    fn slot_id(&self) -> SlotId {
        self.id
    }

    fn show_placeholder(&self, placeholder: Option<&DecodedImage>) {
        self.shown
            .lock()
            .unwrap()
            .push(Shown::Placeholder(placeholder.cloned()));
    }

    fn show_image(&self, image: DecodedImage) {
        self.shown.lock().unwrap().push(Shown::Image(image));
    }
}
