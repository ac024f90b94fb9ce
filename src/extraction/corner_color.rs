//! Corner-color extraction
//!
//! Treats the image border as background: small patches at the four corners
//! (optionally also the four edge midpoints) are averaged into background
//! color estimates, and each pixel's alpha grows with its RGB distance from
//! the nearest estimate.
//!
//! This is the last resort of the fallback chain. It needs no model and
//! succeeds on every non-empty image.

use super::{apply_alpha, ExtractionMethod, MethodKind};
use crate::{config::CornerColorConfig, error::ExtractionError, types::ExtractionResult};
use image::{DynamicImage, GenericImageView, GrayImage, Luma, RgbImage};
use imageproc::{distance_transform::Norm, morphology};
use log::debug;

/// Largest possible RGB distance, between black and white
const MAX_RGB_DISTANCE: f32 = 441.672_96;

/// Foreground extraction by distance from sampled border colors
#[derive(Debug, Clone, Default)]
pub struct CornerColorExtractor {
    config: CornerColorConfig,
}

impl CornerColorExtractor {
    #[must_use]
    pub fn new(config: CornerColorConfig) -> Self {
        Self { config }
    }

    /// Patch centers: corners, then edge midpoints when enabled
    fn sample_points(&self, width: u32, height: u32) -> Vec<(u32, u32)> {
        let (right, bottom) = (width - 1, height - 1);
        let mut points = vec![(0, 0), (right, 0), (0, bottom), (right, bottom)];
        if self.config.sample_edge_midpoints {
            let (mid_x, mid_y) = (width / 2, height / 2);
            points.extend([(mid_x, 0), (mid_x, bottom), (0, mid_y), (right, mid_y)]);
        }
        points
    }

    /// Mean color of the patch around `(cx, cy)`, clipped to the image
    fn patch_mean(&self, rgb: &RgbImage, (cx, cy): (u32, u32)) -> [f32; 3] {
        let radius = self.config.patch_radius;
        let x_end = cx.saturating_add(radius).min(rgb.width() - 1);
        let y_end = cy.saturating_add(radius).min(rgb.height() - 1);
        let x_range = cx.saturating_sub(radius)..=x_end;
        let y_range = cy.saturating_sub(radius)..=y_end;

        let mut sum = [0.0f32; 3];
        let mut count = 0.0f32;
        for y in y_range {
            for x in x_range.clone() {
                let pixel = rgb.get_pixel(x, y);
                for (acc, &value) in sum.iter_mut().zip(pixel.0.iter()) {
                    *acc += f32::from(value);
                }
                count += 1.0;
            }
        }
        sum.map(|s| s / count)
    }

    /// Map a distance from the background to an alpha value
    fn alpha_for_distance(&self, distance: f32) -> u8 {
        let threshold = self.config.threshold;
        let ramp = self.config.ramp_width;
        if distance <= threshold {
            0
        } else if ramp <= 0.0 || distance >= threshold + ramp {
            255
        } else {
            ((distance - threshold) / ramp * 255.0).round().clamp(0.0, 255.0) as u8
        }
    }

    fn mask(&self, rgb: &RgbImage, samples: &[[f32; 3]]) -> GrayImage {
        GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let pixel = rgb.get_pixel(x, y);
            let nearest_sq = samples
                .iter()
                .map(|sample| {
                    sample
                        .iter()
                        .zip(pixel.0.iter())
                        .map(|(&s, &p)| (f32::from(p) - s).powi(2))
                        .sum::<f32>()
                })
                .fold(f32::INFINITY, f32::min);
            Luma([self.alpha_for_distance(nearest_sq.sqrt())])
        })
    }
}

/// Remove speckles and pinholes with a closing then an opening of radius 1
///
/// The morphology runs on the binary support of the mask; surviving pixels
/// keep their graded alpha, pixels filled by the closing become opaque.
fn clean_mask(mask: &GrayImage) -> GrayImage {
    let support = GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        Luma([if mask.get_pixel(x, y)[0] > 0 { 255 } else { 0 }])
    });
    let closed = morphology::close(&support, Norm::LInf, 1);
    let cleaned = morphology::open(&closed, Norm::LInf, 1);

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let original = mask.get_pixel(x, y)[0];
        let alpha = match (cleaned.get_pixel(x, y)[0], original) {
            (0, _) => 0,
            (_, 0) => 255,
            (_, graded) => graded,
        };
        Luma([alpha])
    })
}

/// Agreement between the background samples, 1.0 when all are identical
fn sample_agreement(samples: &[[f32; 3]]) -> f32 {
    let mut spread = 0.0f32;
    for (i, a) in samples.iter().enumerate() {
        for b in &samples[i + 1..] {
            let distance = a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y).powi(2))
                .sum::<f32>()
                .sqrt();
            spread = spread.max(distance);
        }
    }
    1.0 - spread / MAX_RGB_DISTANCE
}

impl ExtractionMethod for CornerColorExtractor {
    fn kind(&self) -> MethodKind {
        MethodKind::CornerColor
    }

    fn probe(&self) -> bool {
        true
    }

    fn extract(&self, image: &DynamicImage) -> Result<ExtractionResult, ExtractionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractionError::new(
                MethodKind::CornerColor,
                "cannot extract from an empty image",
            ));
        }

        let rgb = image.to_rgb8();
        let samples: Vec<[f32; 3]> = self
            .sample_points(width, height)
            .into_iter()
            .map(|point| self.patch_mean(&rgb, point))
            .collect();
        debug!("Background samples: {samples:?}");

        let mut mask = self.mask(&rgb, &samples);
        if self.config.clean_mask {
            mask = clean_mask(&mask);
        }

        Ok(
            ExtractionResult::new(apply_alpha(image, &mask), MethodKind::CornerColor)
                .with_confidence(sample_agreement(&samples)),
        )
    }
}
