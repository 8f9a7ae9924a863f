// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan enhancement — prepares page images for text recognition.
//
// Grayscale, contrast boost, optional denoise, and binarization. Recognisers
// are much more reliable on clean black-on-white input, and a downscale cap
// keeps very large scans from dominating OCR memory.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, instrument};

/// How to threshold the grayscale image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binarization {
    /// Keep grayscale.
    None,
    /// Global threshold from the histogram (Otsu's method).
    Otsu,
    /// Local mean threshold for unevenly lit scans.
    Adaptive { block_radius: u32, c: i32 },
}

/// Preprocessing applied before recognition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcrPreprocessing {
    /// Longest side in pixels; larger images are downscaled.
    pub max_side: u32,
    pub contrast: f32,
    /// Gaussian sigma; `None` skips denoising.
    pub denoise_sigma: Option<f32>,
    pub binarization: Binarization,
}

impl Default for OcrPreprocessing {
    fn default() -> Self {
        Self {
            max_side: 4096,
            contrast: 1.4,
            denoise_sigma: None,
            binarization: Binarization::Otsu,
        }
    }
}

/// Enhances scanned page images for recognition.
pub struct ScanEnhancer {
    image: DynamicImage,
}

impl ScanEnhancer {
    // -- Construction ---------------------------------------------------------

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Pipeline -------------------------------------------------------------

    /// Run the configured preprocessing steps in order.
    #[instrument(skip_all, fields(width = self.image.width(), height = self.image.height()))]
    pub fn prepare(self, settings: &OcrPreprocessing) -> Self {
        let mut enhancer = self.downscale(settings.max_side).grayscale();
        if (settings.contrast - 1.0).abs() > f32::EPSILON {
            enhancer = enhancer.adjust_contrast(settings.contrast);
        }
        if let Some(sigma) = settings.denoise_sigma {
            enhancer = enhancer.denoise(sigma);
        }
        match settings.binarization {
            Binarization::None => enhancer,
            Binarization::Otsu => enhancer.binarize_otsu(),
            Binarization::Adaptive { block_radius, c } => enhancer.binarize(block_radius, c),
        }
    }

    /// Shrink so the longest side is at most `max_side`.
    pub fn downscale(self, max_side: u32) -> Self {
        let (w, h) = (self.image.width(), self.image.height());
        if w.max(h) <= max_side || max_side == 0 {
            return self;
        }
        debug!(w, h, max_side, "Downscaling page image");
        Self {
            image: self.image.resize(max_side, max_side, FilterType::Triangle),
        }
    }

    pub fn grayscale(self) -> Self {
        Self {
            image: DynamicImage::ImageLuma8(self.image.to_luma8()),
        }
    }

    /// Stretch intensities around mid-gray by `factor`.
    pub fn adjust_contrast(self, factor: f32) -> Self {
        let gray = self.image.to_luma8();
        let contrasted = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let value = factor * (gray.get_pixel(x, y).0[0] as f32 - 128.0) + 128.0;
            Luma([value.clamp(0.0, 255.0) as u8])
        });
        Self {
            image: DynamicImage::ImageLuma8(contrasted),
        }
    }

    pub fn denoise(self, sigma: f32) -> Self {
        let gray = self.image.to_luma8();
        Self {
            image: DynamicImage::ImageLuma8(gaussian_blur_f32(&gray, sigma)),
        }
    }

    /// Adaptive thresholding against the local mean in a `block_radius`
    /// neighbourhood, minus `c`.
    pub fn binarize(self, block_radius: u32, c: i32) -> Self {
        let gray = self.image.to_luma8();
        let (width, height) = gray.dimensions();
        let integral = compute_integral_image(&gray);

        let output = GrayImage::from_fn(width, height, |x, y| {
            let local_mean = region_mean(&integral, width, height, x, y, block_radius);
            let threshold = (local_mean as i32 - c).clamp(0, 255) as u8;
            let binary = if gray.get_pixel(x, y).0[0] < threshold { 0u8 } else { 255u8 };
            Luma([binary])
        });

        Self {
            image: DynamicImage::ImageLuma8(output),
        }
    }

    /// Global binarization at the Otsu threshold.
    pub fn binarize_otsu(self) -> Self {
        let gray = self.image.to_luma8();
        let threshold = otsu_threshold(&gray);
        debug!(threshold, "Otsu threshold computed");

        let output = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let binary = if gray.get_pixel(x, y).0[0] < threshold { 0u8 } else { 255u8 };
            Luma([binary])
        });

        Self {
            image: DynamicImage::ImageLuma8(output),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Summed-area table with a zero-padded border, `(width+1) x (height+1)`.
fn compute_integral_image(gray: &GrayImage) -> Vec<u64> {
    let (w, h) = gray.dimensions();
    let stride = (w + 1) as usize;
    let mut table = vec![0u64; stride * (h + 1) as usize];

    for y in 0..h {
        let mut row_sum: u64 = 0;
        for x in 0..w {
            row_sum += gray.get_pixel(x, y).0[0] as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            let above = y as usize * stride + (x + 1) as usize;
            table[idx] = row_sum + table[above];
        }
    }

    table
}

fn region_mean(
    integral: &[u64],
    img_width: u32,
    img_height: u32,
    cx: u32,
    cy: u32,
    radius: u32,
) -> f64 {
    let stride = (img_width + 1) as usize;

    let x1 = cx.saturating_sub(radius) as usize;
    let y1 = cy.saturating_sub(radius) as usize;
    let x2 = ((cx + radius + 1) as usize).min(img_width as usize);
    let y2 = ((cy + radius + 1) as usize).min(img_height as usize);

    let area = ((x2 - x1) * (y2 - y1)) as f64;
    if area == 0.0 {
        return 128.0;
    }

    let sum = integral[y2 * stride + x2] as f64 - integral[y1 * stride + x2] as f64
        - integral[y2 * stride + x1] as f64
        + integral[y1 * stride + x1] as f64;

    sum / area
}

/// Threshold maximising between-class variance of the histogram.
fn otsu_threshold(gray: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total_pixels = gray.width() as u64 * gray.height() as u64;
    if total_pixels == 0 {
        return 128;
    }

    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background: u64 = 0;
    let mut max_variance = 0.0;
    let mut best_threshold: u8 = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count;
        if weight_background == 0 {
            continue;
        }
        let weight_foreground = total_pixels - weight_background;
        if weight_foreground == 0 {
            break;
        }

        sum_background += t as f64 * count as f64;
        let mean_background = sum_background / weight_background as f64;
        let mean_foreground = (sum_total - sum_background) / weight_foreground as f64;
        let between = weight_background as f64
            * weight_foreground as f64
            * (mean_background - mean_foreground).powi(2);

        if between > max_variance {
            max_variance = between;
            best_threshold = t as u8;
        }
    }

    // Pixels strictly below the threshold become black.
    best_threshold.saturating_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Dark text-like block on a light background.
    fn bimodal(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::from_pixel(width, height, Luma([200u8]));
        for y in height / 4..height / 2 {
            for x in width / 4..width * 3 / 4 {
                img.put_pixel(x, y, Luma([40u8]));
            }
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn otsu_separates_two_levels() {
        let gray = bimodal(40, 40).to_luma8();
        let threshold = otsu_threshold(&gray);
        assert!(threshold > 40 && threshold <= 200, "threshold {threshold}");

        let out = ScanEnhancer::from_dynamic(bimodal(40, 40)).binarize_otsu().into_dynamic().to_luma8();
        assert_eq!(out.get_pixel(20, 15).0[0], 0);
        assert_eq!(out.get_pixel(1, 1).0[0], 255);
    }

    #[test]
    fn binarized_output_is_two_tone() {
        let out = ScanEnhancer::from_dynamic(bimodal(32, 32))
            .binarize(5, 10)
            .into_dynamic()
            .to_luma8();
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn contrast_pushes_values_apart() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(2, 1, |x, _| {
            Luma([if x == 0 { 100 } else { 156 }])
        }));
        let out = ScanEnhancer::from_dynamic(img).adjust_contrast(2.0).into_dynamic().to_luma8();
        assert_eq!(out.get_pixel(0, 0).0[0], 72);
        assert_eq!(out.get_pixel(1, 0).0[0], 184);
    }

    #[test]
    fn prepare_produces_downscaled_grayscale() {
        let rgb = DynamicImage::ImageRgb8(RgbImage::from_pixel(300, 150, Rgb([250, 250, 250])));
        let settings = OcrPreprocessing {
            max_side: 100,
            denoise_sigma: Some(1.0),
            ..Default::default()
        };
        let out = ScanEnhancer::from_dynamic(rgb).prepare(&settings).into_dynamic();
        assert!(matches!(out, DynamicImage::ImageLuma8(_)));
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let out = ScanEnhancer::from_dynamic(bimodal(20, 10)).downscale(100).into_dynamic();
        assert_eq!((out.width(), out.height()), (20, 10));
    }
}
