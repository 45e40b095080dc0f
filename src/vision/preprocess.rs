//! Frame preprocessing: gamma correction followed by one of two binarization
//! pipelines that make the tool-tip silhouette detectable.

use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::{box_filter, separable_filter_equal};

use super::frame::Frame;

/// Default gamma applied before binarization.
pub const DEFAULT_GAMMA: f64 = 1.2;

/// Gaussian kernel size used by both pipelines.
pub const BLUR_KERNEL_SIZE: usize = 7;

/// Gaussian sigma used by both pipelines.
pub const BLUR_SIGMA: f32 = 6.0;

/// Adaptive threshold window (pixels, odd).
pub const ADAPTIVE_WINDOW: u32 = 35;

/// Adaptive threshold offset subtracted from the local mean.
pub const ADAPTIVE_OFFSET: i16 = 1;

/// Binarization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Luma plane, Gaussian blur, adaptive local mean threshold.
    Adaptive,
    /// Grayscale, Otsu global threshold, Gaussian blur.
    Otsu,
}

impl Pipeline {
    pub fn name(&self) -> &'static str {
        match self {
            Pipeline::Adaptive => "adaptive",
            Pipeline::Otsu => "otsu",
        }
    }
}

/// Run `pipeline` over `frame`.
///
/// The output is always a three-channel frame so it can be handed to anything
/// that consumes raw frames. Frames that cannot be processed (empty raster,
/// non-positive gamma) are returned unchanged.
pub fn preprocess(frame: &Frame, gamma: f64, pipeline: Pipeline) -> Frame {
    let Some(corrected) = adjust_gamma(frame, gamma) else {
        tracing::debug!("Gamma correction skipped, passing raw frame through");
        return frame.clone();
    };

    let binary = match pipeline {
        Pipeline::Adaptive => {
            let luma = luma_plane(&corrected);
            let blurred = gaussian_blur(&luma);
            adaptive_threshold(&blurred, ADAPTIVE_WINDOW / 2, ADAPTIVE_OFFSET)
        }
        Pipeline::Otsu => {
            let gray = image::imageops::grayscale(&corrected);
            let level = otsu_level(&gray);
            gaussian_blur(&threshold(&gray, level, ThresholdType::Binary))
        }
    };

    DynamicImage::ImageLuma8(binary).to_rgb8()
}

/// Apply `out = 255 * (in / 255) ^ (1 / gamma)` through a lookup table.
pub fn adjust_gamma(frame: &RgbImage, gamma: f64) -> Option<RgbImage> {
    if frame.width() == 0 || frame.height() == 0 || !(gamma.is_finite() && gamma > 0.0) {
        return None;
    }

    let inv_gamma = 1.0 / gamma;
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f64 / 255.0).powf(inv_gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    let mut out = frame.clone();
    for pixel in out.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = table[*channel as usize];
        }
    }
    Some(out)
}

/// BT.601 luma plane (the Y of YUV).
fn luma_plane(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Normalized 1-D Gaussian kernel.
fn gaussian_kernel(size: usize, sigma: f32) -> Vec<f32> {
    let half = (size / 2) as f32;
    let mut kernel: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - half;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= sum);
    kernel
}

fn gaussian_blur(image: &GrayImage) -> GrayImage {
    let kernel = gaussian_kernel(BLUR_KERNEL_SIZE, BLUR_SIGMA);
    separable_filter_equal(image, &kernel)
}

/// Local mean threshold: white where `pixel > mean(window) - offset`.
fn adaptive_threshold(image: &GrayImage, radius: u32, offset: i16) -> GrayImage {
    let mean = box_filter(image, radius, radius);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let value = image.get_pixel(x, y)[0] as i16;
        let local = mean.get_pixel(x, y)[0] as i16;
        if value > local - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
