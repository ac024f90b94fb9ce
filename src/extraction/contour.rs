//! Contour-based extraction
//!
//! Finds the dominant closed outline of the subject:
//!
//! 1. grayscale and Gaussian smoothing
//! 2. Canny edge detection
//! 3. morphological closing to bridge small gaps in the edge map
//! 4. outer contour extraction
//! 5. fill the largest contour, plus any other outer contour of comparable size
//! 6. Gaussian feather of the filled mask
//!
//! No external model is required, so this method is always available, but it
//! fails on images without a clear enclosing outline.

use super::{apply_alpha, ExtractionMethod, MethodKind};
use crate::{config::ContourConfig, error::ExtractionError, types::ExtractionResult};
use image::{imageops, DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    distance_transform::Norm,
    drawing::draw_polygon_mut,
    edges::canny,
    morphology,
    point::Point,
};
use log::debug;
use tracing::{span, Level};

/// Outer contour prepared for filling
struct Outline {
    points: Vec<Point<i32>>,
    area: f64,
}

impl Outline {
    /// Normalize a traced contour into a fillable polygon
    ///
    /// Returns `None` for hole borders and degenerate outlines.
    fn from_contour(contour: Contour<i32>) -> Option<Self> {
        if contour.border_type != BorderType::Outer {
            return None;
        }

        let mut points = contour.points;
        points.dedup();
        while points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return None;
        }

        let area = polygon_area(&points);
        (area > 0.0).then_some(Self { points, area })
    }
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[Point<i32>]) -> f64 {
    let twice_area: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    (twice_area as f64).abs() / 2.0
}

/// Foreground extraction from the largest closed edge contour
#[derive(Debug, Clone, Default)]
pub struct ContourExtractor {
    config: ContourConfig,
}

impl ContourExtractor {
    #[must_use]
    pub fn new(config: ContourConfig) -> Self {
        Self { config }
    }

    fn edge_map(&self, image: &DynamicImage) -> GrayImage {
        let _span = span!(Level::DEBUG, "contour_edges").entered();
        let gray = image.to_luma8();
        let smoothed = if self.config.blur_sigma > 0.0 {
            imageops::blur(&gray, self.config.blur_sigma)
        } else {
            gray
        };
        let edges = canny(&smoothed, self.config.canny_low, self.config.canny_high);
        if self.config.closing_radius > 0 {
            morphology::close(&edges, Norm::LInf, self.config.closing_radius)
        } else {
            edges
        }
    }

    fn mask(&self, image: &DynamicImage) -> Result<GrayImage, ExtractionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ExtractionError::new(
                MethodKind::Contour,
                "cannot extract from an empty image",
            ));
        }

        let edges = self.edge_map(image);
        let mut outlines: Vec<Outline> = find_contours::<i32>(&edges)
            .into_iter()
            .filter_map(Outline::from_contour)
            .collect();
        outlines.sort_by(|a, b| b.area.total_cmp(&a.area));

        let image_area = f64::from(width) * f64::from(height);
        let largest = outlines.first().map_or(0.0, |o| o.area);
        debug!(
            "Found {} outer contours, largest covers {:.1}% of the image",
            outlines.len(),
            largest / image_area * 100.0
        );
        if largest < f64::from(self.config.min_area_ratio) * image_area {
            return Err(ExtractionError::new(
                MethodKind::Contour,
                "no closed contour encloses enough of the image",
            ));
        }

        let secondary_floor = largest * f64::from(self.config.secondary_area_ratio);
        let mut mask = GrayImage::new(width, height);
        for outline in outlines.iter().take_while(|o| o.area >= secondary_floor) {
            draw_polygon_mut(&mut mask, &outline.points, Luma([255u8]));
        }

        if self.config.soft_edge_px > 0.0 {
            mask = imageops::blur(&mask, self.config.soft_edge_px / 2.0);
        }
        Ok(mask)
    }
}

impl ExtractionMethod for ContourExtractor {
    fn kind(&self) -> MethodKind {
        MethodKind::Contour
    }

    fn probe(&self) -> bool {
        true
    }

    fn extract(&self, image: &DynamicImage) -> Result<ExtractionResult, ExtractionError> {
        let mask = self.mask(image)?;
        Ok(ExtractionResult::new(apply_alpha(image, &mask), MethodKind::Contour))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Light background with a dark filled rectangle
    fn subject_image() -> DynamicImage {
        let mut image = RgbImage::from_pixel(160, 120, Rgb([235, 235, 235]));
        for y in 30..90 {
            for x in 40..120 {
                image.put_pixel(x, y, Rgb([20, 40, 160]));
            }
        }
        DynamicImage::ImageRgb8(image)
    }

    #[test]
    fn test_fills_enclosed_subject() {
        let extractor = ContourExtractor::default();
        let result = extractor.extract(&subject_image()).unwrap();

        assert_eq!(result.method, MethodKind::Contour);
        assert_eq!(result.dimensions(), (160, 120));
        assert!(result.image.get_pixel(80, 60)[3] >= 250);
        assert_eq!(result.image.get_pixel(5, 5)[3], 0);
        assert_eq!(result.image.get_pixel(150, 110)[3], 0);
    }

    #[test]
    fn test_soft_edge_produces_partial_alpha() {
        let extractor = ContourExtractor::default();
        let result = extractor.extract(&subject_image()).unwrap();
        let partial = result
            .image
            .pixels()
            .filter(|p| p[3] > 0 && p[3] < 255)
            .count();
        assert!(partial > 0);

        let hard = ContourExtractor::new(ContourConfig {
            soft_edge_px: 0.0,
            ..ContourConfig::default()
        });
        let result = hard.extract(&subject_image()).unwrap();
        assert!(result.image.pixels().all(|p| p[3] == 0 || p[3] == 255));
    }

    #[test]
    fn test_uniform_image_has_no_contour() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb([128, 128, 128])));
        let error = ContourExtractor::default().extract(&image).unwrap_err();
        assert_eq!(error.method, MethodKind::Contour);
        assert!(error.cause.contains("no closed contour"));
    }

    #[test]
    fn test_tiny_speck_is_below_area_floor() {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([255, 255, 255]));
        for y in 100..104 {
            for x in 100..104 {
                image.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let result = ContourExtractor::default().extract(&DynamicImage::ImageRgb8(image));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_image_is_an_error() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        assert!(ContourExtractor::default().extract(&image).is_err());
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < f64::EPSILON);
    }
}
