//! Sample-size calculation and sampled decoding.
//!
//! Decoding happens in two passes. The first reads only the image header to
//! learn the source dimensions without allocating pixels. The divisor is then
//! chosen from those dimensions and the second pass decodes and reduces the
//! image by that divisor.
//!
//! The `image` decoders have no reduced-resolution mode, so the second pass
//! still materialises the full-size pixels before reducing them. Peak memory
//! per decode is the full source; only the buffer that is kept and cached is
//! the reduced one.
//!
//! All state lives in locals, so decoding the same source concurrently from
//! several tasks is safe.

use std::io::{BufRead, Cursor, Seek};
use std::path::Path;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::debug;

use super::{DecodedImage, TargetSize};
use crate::error::{DecodeError, FetchError, LoadError};

/// Compute the sample divisor for decoding a `source` sized image into
/// `target`.
///
/// The result is the largest `n` for which `source / n` is still at least the
/// requested size in both dimensions, which keeps the aspect ratio and never
/// produces an image smaller than asked for. Sources already at or below the
/// target decode at `n = 1`.
///
/// Any further reduction to bring the pixel count under twice the requested
/// pixel count would drop one dimension under the request, so the fit always
/// wins over the pixel budget.
///
/// # Example
///
/// ```
/// use thumbcache::bitmap::{calculate_sample_size, TargetSize};
///
/// // Panorama: the height binds, the width stays wider than requested.
/// assert_eq!(calculate_sample_size((4000, 2000), TargetSize::new(100, 100)), 20);
/// ```
pub fn calculate_sample_size(source: (u32, u32), target: TargetSize) -> u32 {
    let (width, height) = source;
    let req_width = target.width.max(1);
    let req_height = target.height.max(1);

    if width <= req_width && height <= req_height {
        return 1;
    }

    (width / req_width).min(height / req_height).max(1)
}

/// Decodes image bytes at the smallest integer scale that still covers a
/// target size.
///
/// Reduction uses a triangle (bilinear) filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Downsampler;

impl Downsampler {
    pub fn new() -> Self {
        Self
    }

    /// Read only the header of `source` and return its `(width, height)`.
    pub fn read_dimensions(&self, source: &[u8]) -> Result<(u32, u32), DecodeError> {
        if source.is_empty() {
            return Err(DecodeError::EmptySource);
        }
        dimensions_of(Cursor::new(source))
    }

    /// Decode `source` bytes sampled down towards `target`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the bytes are empty or not a supported
    /// image, or if `target` has a zero dimension. No partial image is ever
    /// produced.
    ///
    /// The full-resolution pixels exist transiently during the call.
    pub fn decode_sampled(
        &self,
        source: &[u8],
        target: TargetSize,
    ) -> Result<DecodedImage, DecodeError> {
        check_target(target)?;
        let dimensions = self.read_dimensions(source)?;
        let sample_size = calculate_sample_size(dimensions, target);
        let pixels = decode_reader(Cursor::new(source))?;
        Ok(self.reduce(pixels, sample_size))
    }

    /// Decode the file at `path` sampled down towards `target`.
    ///
    /// The header read takes only as much of the file as the format needs.
    pub fn decode_sampled_file(
        &self,
        path: &Path,
        target: TargetSize,
    ) -> Result<DecodedImage, LoadError> {
        check_target(target)?;
        let dimensions = dimensions_of(open_file(path)?)?;
        let sample_size = calculate_sample_size(dimensions, target);
        let pixels = decode_reader(open_file(path)?)?;
        Ok(self.reduce(pixels, sample_size))
    }

    /// Decode `source` at full resolution.
    pub fn decode_full(&self, source: &[u8]) -> Result<DecodedImage, DecodeError> {
        if source.is_empty() {
            return Err(DecodeError::EmptySource);
        }
        decode_reader(Cursor::new(source)).map(DecodedImage::new)
    }

    /// Reduce an already decoded image towards `target`.
    ///
    /// Used when a cached image was stored for a larger request. Returns the
    /// same buffer when no reduction is needed.
    pub fn resample(&self, image: DecodedImage, target: TargetSize) -> DecodedImage {
        let sample_size = calculate_sample_size(image.dimensions(), target);
        if sample_size <= 1 {
            return image;
        }
        self.reduce(image.pixels().clone(), sample_size)
    }

    fn reduce(&self, pixels: DynamicImage, sample_size: u32) -> DecodedImage {
        if sample_size <= 1 {
            return DecodedImage::new(pixels);
        }

        let width = (pixels.width() / sample_size).max(1);
        let height = (pixels.height() / sample_size).max(1);
        debug!(
            source_width = pixels.width(),
            source_height = pixels.height(),
            sample_size,
            width,
            height,
            "Downsampling decoded image"
        );

        DecodedImage::new(pixels.resize_exact(width, height, FilterType::Triangle))
    }
}

fn check_target(target: TargetSize) -> Result<(), DecodeError> {
    if target.width == 0 || target.height == 0 {
        return Err(DecodeError::InvalidTarget {
            width: target.width,
            height: target.height,
        });
    }
    Ok(())
}

fn open_file(path: &Path) -> Result<std::io::BufReader<std::fs::File>, FetchError> {
    let file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FetchError::NotFound(path.display().to_string()),
        _ => FetchError::Io(e.to_string()),
    })?;
    Ok(std::io::BufReader::new(file))
}

fn dimensions_of<R: BufRead + Seek>(reader: R) -> Result<(u32, u32), DecodeError> {
    ImageReader::new(reader)
        .with_guessed_format()
        .map_err(unreadable)?
        .into_dimensions()
        .map_err(unreadable)
}

fn decode_reader<R: BufRead + Seek>(reader: R) -> Result<DynamicImage, DecodeError> {
    ImageReader::new(reader)
        .with_guessed_format()
        .map_err(unreadable)?
        .decode()
        .map_err(unreadable)
}

fn unreadable(err: impl std::fmt::Display) -> DecodeError {
    DecodeError::Unreadable {
        message: err.to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
