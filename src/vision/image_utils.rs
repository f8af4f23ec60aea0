// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image input decoding for recognition requests

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use thiserror::Error;

use crate::error::OcrError;

/// Reasons an input could not be turned into an image
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Unsupported image format")]
    UnsupportedFormat,

    #[error("Failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("Image data is empty")]
    EmptyData,

    #[error("Image has zero width or height")]
    ZeroSized,

    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ImageError> for OcrError {
    fn from(err: ImageError) -> Self {
        OcrError::InvalidImage(err.to_string())
    }
}

/// Metadata about a decoded input
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub size_bytes: usize,
}

/// Decode raw encoded image bytes in any format the `image` crate reads
pub fn decode_image_bytes(bytes: &[u8]) -> Result<(DynamicImage, ImageInfo), ImageError> {
    decode_with_hint(bytes, None)
}

/// Decode a base64-encoded image
pub fn decode_base64_image(base64_str: &str) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if base64_str.trim().is_empty() {
        return Err(ImageError::EmptyData);
    }

    let bytes = STANDARD.decode(base64_str.trim())?;
    decode_image_bytes(&bytes)
}

/// Read and decode an image file
///
/// The file extension is used when the content has no recognizable
/// signature (TGA).
pub fn load_image_file<P: AsRef<Path>>(path: P) -> Result<(DynamicImage, ImageInfo), ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    decode_with_hint(&bytes, ImageFormat::from_path(path).ok())
}

/// Detect image format from the content signature
pub fn detect_format(bytes: &[u8]) -> Result<ImageFormat, ImageError> {
    image::guess_format(bytes).map_err(|_| ImageError::UnsupportedFormat)
}

fn decode_with_hint(
    bytes: &[u8],
    hint: Option<ImageFormat>,
) -> Result<(DynamicImage, ImageInfo), ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::EmptyData);
    }

    let format = match (detect_format(bytes), hint) {
        (Ok(format), _) => format,
        (Err(_), Some(format)) => format,
        (Err(err), None) => return Err(err),
    };
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;

    if img.width() == 0 || img.height() == 0 {
        return Err(ImageError::ZeroSized);
    }

    let info = ImageInfo {
        width: img.width(),
        height: img.height(),
        format,
        size_bytes: bytes.len(),
    };

    Ok((img, info))
}
