//! Input validation and large-image downscaling

use crate::{
    config::SizeGuardConfig,
    error::{BgSwapError, Result},
    types::{OptimizedImage, SourceImage},
};
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use log::{debug, warn};
use tracing::instrument;

/// Enforces dimension and size limits and bounds the working resolution
#[derive(Debug, Clone, Default)]
pub struct SizeGuard {
    config: SizeGuardConfig,
}

impl SizeGuard {
    #[must_use]
    pub fn new(config: SizeGuardConfig) -> Self {
        Self { config }
    }

    /// Reject images that are too small or whose upload exceeded the byte limit
    ///
    /// # Errors
    /// - Either dimension below the configured minimum
    /// - Declared byte size above the configured maximum
    pub fn check(&self, source: &SourceImage) -> Result<()> {
        let (width, height) = source.dimensions();
        let min = self.config.min_dimension;
        if width < min || height < min {
            return Err(BgSwapError::dimension_error(
                width,
                height,
                &format!("minimum is {min}x{min}"),
            ));
        }

        if source.byte_size() > self.config.max_upload_bytes {
            return Err(BgSwapError::validation(format!(
                "Image of {} bytes exceeds the {} byte limit",
                source.byte_size(),
                self.config.max_upload_bytes
            )));
        }
        Ok(())
    }

    /// Target dimensions for an image, or `None` when it already fits
    ///
    /// The long edge becomes the threshold; the short edge is scaled by the
    /// same factor, rounded, and kept at least one pixel.
    #[must_use]
    pub fn target_dimensions(&self, width: u32, height: u32) -> Option<(u32, u32)> {
        let threshold = self.config.large_image_threshold;
        let long_edge = width.max(height);
        if long_edge <= threshold || threshold == 0 {
            return None;
        }

        let scale = f64::from(threshold) / f64::from(long_edge);
        let scale_edge = |edge: u32| ((f64::from(edge) * scale).round() as u32).clamp(1, threshold);
        if width >= height {
            Some((threshold, scale_edge(height)))
        } else {
            Some((scale_edge(width), threshold))
        }
    }

    /// Downscale oversized images with Lanczos3, never enlarging
    ///
    /// A failed resize is not fatal: the original passes through and the
    /// reason is recorded on the result.
    #[instrument(skip(self, source), fields(dimensions = ?source.dimensions()))]
    pub fn optimize(&self, source: SourceImage) -> OptimizedImage {
        let original_dimensions = source.dimensions();
        let (width, height) = original_dimensions;

        let Some((target_width, target_height)) = self.target_dimensions(width, height) else {
            debug!("Image {width}x{height} within limits, no downscaling");
            return Self::passthrough(source.into_image(), original_dimensions, None);
        };

        let image = source.into_image();
        match Self::downscale(&image, target_width, target_height) {
            Ok(resized) => {
                debug!("Downscaled {width}x{height} to {target_width}x{target_height}");
                OptimizedImage {
                    image: resized,
                    original_dimensions,
                    downscaled: true,
                    scale_factor: target_width.max(target_height) as f32
                        / width.max(height) as f32,
                    optimization_error: None,
                }
            },
            Err(e) => {
                warn!("Downscaling failed, continuing with the original image: {e}");
                Self::passthrough(image, original_dimensions, Some(e.to_string()))
            },
        }
    }

    fn downscale(image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
        let resized = image.resize_exact(width, height, FilterType::Lanczos3);
        if resized.dimensions() != (width, height) {
            return Err(BgSwapError::internal(format!(
                "resize produced {}x{} instead of {width}x{height}",
                resized.width(),
                resized.height()
            )));
        }
        Ok(resized)
    }

    fn passthrough(
        image: DynamicImage,
        original_dimensions: (u32, u32),
        optimization_error: Option<String>,
    ) -> OptimizedImage {
        OptimizedImage {
            image,
            original_dimensions,
            downscaled: false,
            scale_factor: 1.0,
            optimization_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn source(width: u32, height: u32, byte_size: u64) -> SourceImage {
        SourceImage::new(
            DynamicImage::ImageRgb8(RgbImage::new(width, height)),
            byte_size,
            Some("image/png".to_string()),
        )
    }

    #[test]
    fn test_target_dimensions_preserve_aspect_ratio() {
        let guard = SizeGuard::default();
        assert_eq!(guard.target_dimensions(8000, 3000), Some((2000, 750)));
        assert_eq!(guard.target_dimensions(3000, 8000), Some((750, 2000)));
        assert_eq!(guard.target_dimensions(4000, 4000), Some((2000, 2000)));
        assert_eq!(guard.target_dimensions(2001, 3), Some((2000, 3)));
        assert_eq!(guard.target_dimensions(100_000, 10), Some((2000, 1)));
    }

    #[test]
    fn test_never_enlarges() {
        let guard = SizeGuard::default();
        assert_eq!(guard.target_dimensions(2000, 1999), None);
        assert_eq!(guard.target_dimensions(64, 64), None);

        let optimized = guard.optimize(source(120, 80, 100));
        assert!(!optimized.downscaled);
        assert_eq!(optimized.dimensions(), (120, 80));
        assert!((optimized.scale_factor - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_optimize_downscales_large_images() {
        let guard = SizeGuard::new(SizeGuardConfig {
            large_image_threshold: 200,
            ..SizeGuardConfig::default()
        });
        let optimized = guard.optimize(source(800, 300, 100));
        assert!(optimized.downscaled);
        assert_eq!(optimized.dimensions(), (200, 75));
        assert_eq!(optimized.original_dimensions, (800, 300));
        assert!((optimized.scale_factor - 0.25).abs() < 1e-6);
        assert!(optimized.optimization_error.is_none());
    }

    #[test]
    fn test_check_limits() {
        let guard = SizeGuard::default();
        assert!(guard.check(&source(50, 50, 1000)).is_ok());
        assert!(matches!(
            guard.check(&source(49, 500, 1000)),
            Err(BgSwapError::Validation(_))
        ));
        assert!(matches!(
            guard.check(&source(500, 500, 25 * 1024 * 1024 + 1)),
            Err(BgSwapError::Validation(_))
        ));
    }
}
