// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Image preprocessing for the vision encoder

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::Array4;

use super::resize::resize_bilinear;
use crate::config::PreprocessorConfig;
use crate::error::{OcrError, Result};

/// ITU-R 601-2 luma in 16-bit fixed point
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Convert to grayscale and back to 3 identical channels
///
/// Colour input is reduced with [`luma`]; grayscale input keeps its own luma
/// channel. Alpha is discarded.
pub fn to_grayscale_rgb(image: &DynamicImage) -> RgbImage {
    let gray = |l: u8| Rgb([l, l, l]);

    match image {
        DynamicImage::ImageLuma8(img) => {
            RgbImage::from_fn(img.width(), img.height(), |x, y| gray(img.get_pixel(x, y).0[0]))
        }
        DynamicImage::ImageLumaA8(img) => {
            RgbImage::from_fn(img.width(), img.height(), |x, y| gray(img.get_pixel(x, y).0[0]))
        }
        other => {
            let rgb = other.to_rgb8();
            RgbImage::from_fn(rgb.width(), rgb.height(), |x, y| {
                let [r, g, b] = rgb.get_pixel(x, y).0;
                gray(luma(r, g, b))
            })
        }
    }
}

/// Resizes and normalizes images into the encoder's `[1, 3, H, W]` input
#[derive(Clone)]
pub struct ImageProcessor {
    config: PreprocessorConfig,
    /// Normalized value for every (channel, 8-bit level)
    lookup: [[f32; 256]; 3],
}

impl std::fmt::Debug for ImageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ImageProcessor {
    pub fn new(config: PreprocessorConfig) -> Self {
        let mut lookup = [[0f32; 256]; 3];
        for (c, table) in lookup.iter_mut().enumerate() {
            for (level, slot) in table.iter_mut().enumerate() {
                // Rescale in double precision, normalize in single. A pure f32
                // rescale differs by 1 ulp on some levels (48 among them).
                let rescaled = (level as f64 * config.rescale_factor) as f32;
                *slot = (rescaled - config.image_mean[c]) / config.image_std[c];
            }
        }

        Self { config, lookup }
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Shape of the tensor produced by [`process`](Self::process)
    pub fn output_shape(&self) -> [usize; 4] {
        [
            1,
            3,
            self.config.height() as usize,
            self.config.width() as usize,
        ]
    }

    /// Preprocess a decoded image
    ///
    /// Steps:
    /// 1. Force 3-channel colour
    /// 2. Bilinear resize to the configured size
    /// 3. Rescale and normalize per channel: (x * rescale - mean) / std
    /// 4. Lay out as NCHW with batch size 1
    pub fn process(&self, image: &DynamicImage) -> Result<Array4<f32>> {
        match image {
            DynamicImage::ImageRgb8(rgb) => self.process_rgb(rgb),
            other => self.process_rgb(&other.to_rgb8()),
        }
    }

    /// Preprocess an image that is already 8-bit RGB
    pub fn process_rgb(&self, rgb: &RgbImage) -> Result<Array4<f32>> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(OcrError::InvalidImage(format!(
                "image has zero size ({}x{})",
                rgb.width(),
                rgb.height()
            )));
        }

        let width = self.config.width();
        let height = self.config.height();
        let resized = resize_bilinear(rgb, width, height);

        let mut tensor = Array4::zeros((1, 3, height as usize, width as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = self.lookup[c][pixel.0[c] as usize];
            }
        }

        Ok(tensor)
    }
}
