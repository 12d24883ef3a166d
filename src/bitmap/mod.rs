//! Decoded bitmaps and the decode/resize pipeline.
//!
//! # Components
//!
//! - [`DecodedImage`]: Immutable pixel buffer shared by reference between cache
//!   tiers and deliveries
//! - [`TargetSize`]: The display size a request wants to fill
//! - [`Downsampler`]: Reads source dimensions, picks a sample divisor and
//!   decodes at that divisor
//! - [`ImageCodec`]: Compresses decoded images for the disk tier

mod codec;
mod downsample;

use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

pub use codec::{
    clamp_quality, CompressFormat, ImageCodec, DEFAULT_COMPRESS_FORMAT, DEFAULT_COMPRESS_QUALITY,
    MAX_QUALITY, MIN_QUALITY,
};
pub use downsample::{calculate_sample_size, Downsampler};

// =============================================================================
// Target Size
// =============================================================================

/// Requested display size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Square target of `size` x `size`.
    pub fn square(size: u32) -> Self {
        Self::new(size, size)
    }

    /// Pixel count of the request.
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for TargetSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// =============================================================================
// Decoded Image
// =============================================================================

/// An immutable decoded pixel buffer.
///
/// Cloning is cheap: the pixels are reference counted, so the same buffer can
/// sit in the memory cache and be handed to a slot at the same time.
///
/// The byte size is `row_stride * height`, which is what the memory cache
/// charges against its capacity.
#[derive(Clone)]
pub struct DecodedImage {
    pixels: Arc<DynamicImage>,
    byte_size: usize,
}

impl DecodedImage {
    /// Wrap a decoded image.
    pub fn new(pixels: DynamicImage) -> Self {
        let stride = row_stride(&pixels);
        let byte_size = stride * pixels.height() as usize;
        Self {
            pixels: Arc::new(pixels),
            byte_size,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Bytes per row of the pixel buffer.
    pub fn row_stride(&self) -> usize {
        row_stride(&self.pixels)
    }

    /// Total bytes held by the pixel buffer.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Borrow the underlying pixels.
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// Whether two handles share the same pixel buffer.
    pub fn ptr_eq(&self, other: &DecodedImage) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.pixels.color())
            .field("byte_size", &self.byte_size)
            .finish()
    }
}

impl From<DynamicImage> for DecodedImage {
    fn from(pixels: DynamicImage) -> Self {
        Self::new(pixels)
    }
}

fn row_stride(pixels: &DynamicImage) -> usize {
    pixels.width() as usize * pixels.color().bytes_per_pixel() as usize
}
