// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Fixed-point bilinear resampling
//!
//! Reproduces Pillow's `Image.resize(size, BILINEAR)` bit for bit, which is
//! what the recognition model saw during training. The generic filters in the
//! `image` crate differ by one or two grey levels on most pixels, enough to
//! change decoded text on borderline glyphs.
//!
//! The resampler is separable: a horizontal pass into a temporary image that
//! only covers the source rows the vertical pass reads, then a vertical pass.
//! When downscaling, the triangle kernel's support grows with the scale factor
//! so every source pixel contributes (antialiasing).

use image::{Rgb, RgbImage};

/// Fractional bits of the fixed-point filter weights
const PRECISION_BITS: u32 = 32 - 8 - 2;

/// Rounding bias added before the final shift
const ROUNDING: i64 = 1 << (PRECISION_BITS - 1);

/// Support of the triangle kernel at scale 1
const BILINEAR_SUPPORT: f64 = 1.0;

fn triangle(x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        1.0 - x
    } else {
        0.0
    }
}

fn clip8(acc: i64) -> u8 {
    (acc >> PRECISION_BITS).clamp(0, 255) as u8
}

/// Per-output-pixel filter taps along one axis
struct Coefficients {
    /// Stride of `weights` (max taps per output pixel)
    ksize: usize,
    /// `(first source index, tap count)` per output pixel
    bounds: Vec<(usize, usize)>,
    weights: Vec<i32>,
}

impl Coefficients {
    fn bilinear(in_size: u32, out_size: u32) -> Self {
        let scale = in_size as f64 / out_size as f64;
        let filterscale = scale.max(1.0);
        let support = BILINEAR_SUPPORT * filterscale;
        let ksize = support.ceil() as usize * 2 + 1;

        let mut bounds = Vec::with_capacity(out_size as usize);
        let mut weights = vec![0i32; ksize * out_size as usize];
        let mut taps = vec![0f64; ksize];

        for xx in 0..out_size as usize {
            let center = (xx as f64 + 0.5) * scale;
            // Truncation toward zero, then clamp to the source
            let xmin = ((center - support + 0.5) as i64).max(0) as usize;
            let xmax = ((center + support + 0.5) as i64).min(in_size as i64) as usize;
            let count = xmax.saturating_sub(xmin).min(ksize);

            let mut total = 0.0;
            for (x, tap) in taps.iter_mut().enumerate().take(count) {
                *tap = triangle((x as f64 + xmin as f64 - center + 0.5) / filterscale);
                total += *tap;
            }

            let row = &mut weights[xx * ksize..(xx + 1) * ksize];
            for (slot, &tap) in row.iter_mut().zip(&taps[..count]) {
                let w = if total != 0.0 { tap / total } else { tap };
                *slot = to_fixed(w);
            }

            bounds.push((xmin, count));
        }

        Self {
            ksize,
            bounds,
            weights,
        }
    }

    fn taps(&self, out_index: usize) -> (usize, &[i32]) {
        let (min, count) = self.bounds[out_index];
        let start = out_index * self.ksize;
        (min, &self.weights[start..start + count])
    }

    /// Source range `[first, last)` read by any output pixel
    fn span(&self) -> (usize, usize) {
        let first = self.bounds.first().map(|b| b.0).unwrap_or(0);
        let last = self.bounds.last().map(|b| b.0 + b.1).unwrap_or(0);
        (first, last.max(first))
    }
}

fn to_fixed(w: f64) -> i32 {
    let scaled = w * (1u32 << PRECISION_BITS) as f64;
    if w < 0.0 {
        (scaled - 0.5) as i32
    } else {
        (scaled + 0.5) as i32
    }
}

fn resample_horizontal(src: &RgbImage, coeffs: &Coefficients, first_row: usize, rows: usize) -> RgbImage {
    let out_width = coeffs.bounds.len() as u32;
    RgbImage::from_fn(out_width, rows as u32, |xx, yy| {
        let (min, taps) = coeffs.taps(xx as usize);
        let y = (first_row + yy as usize) as u32;
        let mut acc = [ROUNDING; 3];
        for (x, &w) in taps.iter().enumerate() {
            let px = src.get_pixel((min + x) as u32, y);
            for (sum, &channel) in acc.iter_mut().zip(px.0.iter()) {
                *sum += channel as i64 * w as i64;
            }
        }
        Rgb(acc.map(clip8))
    })
}

fn resample_vertical(src: &RgbImage, coeffs: &Coefficients, row_offset: usize) -> RgbImage {
    let out_height = coeffs.bounds.len() as u32;
    RgbImage::from_fn(src.width(), out_height, |xx, yy| {
        let (min, taps) = coeffs.taps(yy as usize);
        let mut acc = [ROUNDING; 3];
        for (y, &w) in taps.iter().enumerate() {
            let px = src.get_pixel(xx, (min - row_offset + y) as u32);
            for (sum, &channel) in acc.iter_mut().zip(px.0.iter()) {
                *sum += channel as i64 * w as i64;
            }
        }
        Rgb(acc.map(clip8))
    })
}

/// Resize to exactly `width` x `height` with Pillow-compatible bilinear filtering
///
/// An empty source produces a black image of the requested size.
pub fn resize_bilinear(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (in_width, in_height) = src.dimensions();
    if (in_width, in_height) == (width, height) {
        return src.clone();
    }
    if in_width == 0 || in_height == 0 || width == 0 || height == 0 {
        return RgbImage::new(width, height);
    }

    let need_horizontal = in_width != width;
    let need_vertical = in_height != height;

    if !need_vertical {
        let horiz = Coefficients::bilinear(in_width, width);
        return resample_horizontal(src, &horiz, 0, in_height as usize);
    }

    let vert = Coefficients::bilinear(in_height, height);
    if !need_horizontal {
        return resample_vertical(src, &vert, 0);
    }

    let horiz = Coefficients::bilinear(in_width, width);
    let (first, last) = vert.span();
    let temp = resample_horizontal(src, &horiz, first, last - first);
    resample_vertical(&temp, &vert, first)
}
