//! Compression of decoded images for the disk tier.
//!
//! # Design Decisions
//!
//! - **JPEG drops alpha**: JPEG has no alpha channel, so images are flattened
//!   to RGB before encoding. Use [`CompressFormat::Png`] for images that need
//!   transparency or exact pixels.
//!
//! - **Quality only applies to JPEG**: PNG is lossless and ignores the quality
//!   setting.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ImageEncoder};

use super::{DecodedImage, Downsampler};
use crate::error::{CacheError, DecodeError};

/// Default compression format for the disk tier.
pub const DEFAULT_COMPRESS_FORMAT: CompressFormat = CompressFormat::Jpeg;

/// Default JPEG quality (1-100).
pub const DEFAULT_COMPRESS_QUALITY: u8 = 70;

/// Minimum allowed quality.
pub const MIN_QUALITY: u8 = 1;

/// Maximum allowed quality.
pub const MAX_QUALITY: u8 = 100;

/// Format used when writing images to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressFormat {
    Jpeg,
    Png,
}

impl fmt::Display for CompressFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressFormat::Jpeg => f.write_str("jpeg"),
            CompressFormat::Png => f.write_str("png"),
        }
    }
}

impl FromStr for CompressFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(CompressFormat::Jpeg),
            "png" => Ok(CompressFormat::Png),
            other => Err(format!("unknown compress format '{}'", other)),
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Encodes decoded images into a compressed blob and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCodec {
    format: CompressFormat,
    quality: u8,
}

impl ImageCodec {
    /// Create a codec. Quality is clamped to 1-100.
    pub fn new(format: CompressFormat, quality: u8) -> Self {
        Self {
            format,
            quality: clamp_quality(quality),
        }
    }

    pub fn format(&self) -> CompressFormat {
        self.format
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress `image` into the configured format.
    pub fn encode(&self, image: &DecodedImage) -> Result<Bytes, CacheError> {
        let mut output = Vec::new();

        match self.format {
            CompressFormat::Jpeg => {
                let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
                match image.pixels() {
                    DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
                    DynamicImage::ImageRgb8(rgb) => encoder.encode_image(rgb),
                    other => encoder.encode_image(&other.to_rgb8()),
                }
                .map_err(encode_error)?;
            }
            CompressFormat::Png => {
                let pixels = image.pixels();
                PngEncoder::new(&mut output)
                    .write_image(
                        pixels.as_bytes(),
                        pixels.width(),
                        pixels.height(),
                        pixels.color().into(),
                    )
                    .map_err(encode_error)?;
            }
        }

        Ok(Bytes::from(output))
    }

    /// Decode a blob previously produced by [`encode`](Self::encode).
    pub fn decode(&self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
        Downsampler::new().decode_full(data)
    }
}

impl Default for ImageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESS_FORMAT, DEFAULT_COMPRESS_QUALITY)
    }
}

fn encode_error(err: image::ImageError) -> CacheError {
    CacheError::Encode {
        message: err.to_string(),
    }
}

/// Clamp quality to the valid range.
///
/// Values below 1 become 1, values above 100 become 100.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_QUALITY, MAX_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
