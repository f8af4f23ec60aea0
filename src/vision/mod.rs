// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image handling for the recognition pipeline
//!
//! This module provides:
//! - Input decoding from bytes, base64 and files
//! - A Pillow-compatible bilinear resampler
//! - Grayscale round trip and tensor preprocessing for the encoder

pub mod image_utils;
pub mod preprocessing;
pub mod resize;

pub use image_utils::{
    decode_base64_image, decode_image_bytes, detect_format, load_image_file, ImageError, ImageInfo,
};
pub use preprocessing::{luma, to_grayscale_rgb, ImageProcessor};
pub use resize::resize_bilinear;
