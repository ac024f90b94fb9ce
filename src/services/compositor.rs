//! Background compositing
//!
//! Blends an extracted foreground over each requested background and encodes
//! the result. Transparent backgrounds keep the RGBA raster as is and encode
//! PNG; solid colors are blended per channel and encoded as opaque JPEG.

use super::OutputFormatHandler;
use crate::{
    error::Result,
    types::{BackgroundSpec, CompositedOutput, ExtractionResult, OutputEncoding},
};
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use log::debug;
use tracing::{span, Level};

/// Produces one encoded artifact per background
#[derive(Debug, Clone, Copy)]
pub struct Compositor {
    jpeg_quality: u8,
}

impl Default for Compositor {
    fn default() -> Self {
        Self { jpeg_quality: 95 }
    }
}

impl Compositor {
    #[must_use]
    pub fn new(jpeg_quality: u8) -> Self {
        Self { jpeg_quality }
    }

    /// Composite `foreground` over every background, in order
    ///
    /// # Errors
    /// - Encoding failure of any output; no partial result is returned
    pub fn composite(
        &self,
        foreground: &ExtractionResult,
        backgrounds: &[BackgroundSpec],
    ) -> Result<Vec<CompositedOutput>> {
        backgrounds
            .iter()
            .map(|background| self.composite_one(&foreground.image, *background))
            .collect()
    }

    /// Composite a single background
    ///
    /// # Errors
    /// - Encoding failure
    pub fn composite_one(
        &self,
        foreground: &RgbaImage,
        background: BackgroundSpec,
    ) -> Result<CompositedOutput> {
        let _span = span!(Level::DEBUG, "composite", background = %background).entered();
        let encoding = OutputFormatHandler::encoding_for(&background);

        let (raster, bytes) = match (encoding, background.fill_rgb()) {
            (OutputEncoding::Jpeg, Some(fill)) => {
                let blended = blend_over(foreground, fill);
                let bytes = OutputFormatHandler::encode_jpeg(&blended, self.jpeg_quality)?;
                (DynamicImage::ImageRgb8(blended), bytes)
            },
            _ => {
                let bytes = OutputFormatHandler::encode_png(foreground)?;
                (DynamicImage::ImageRgba8(foreground.clone()), bytes)
            },
        };

        debug!(
            "Composited {} background: {} bytes of {}",
            background,
            bytes.len(),
            encoding.mime_type()
        );
        Ok(CompositedOutput {
            background,
            encoding,
            raster,
            bytes,
        })
    }
}

/// `out = fg * a + bg * (1 - a)` per channel, with `a` in 0-1
#[must_use]
pub fn blend_over(foreground: &RgbaImage, fill: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(foreground.width(), foreground.height(), |x, y| {
        let pixel = foreground.get_pixel(x, y);
        let alpha = f32::from(pixel[3]) / 255.0;
        let mut out = [0u8; 3];
        for ((slot, &fg), &bg) in out.iter_mut().zip(&pixel.0[..3]).zip(&fill) {
            let value = f32::from(fg) * alpha + f32::from(bg) * (1.0 - alpha);
            *slot = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::MethodKind;
    use crate::types::PresetColor;
    use image::Rgba;

    fn foreground() -> ExtractionResult {
        let mut image = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 0, 0]));
        for y in 0..10 {
            for x in 10..20 {
                image.put_pixel(x, y, Rgba([200, 40, 40, 255]));
            }
        }
        image.put_pixel(5, 5, Rgba([100, 100, 100, 128]));
        ExtractionResult::new(image, MethodKind::CornerColor)
    }

    #[test]
    fn test_blend_rule() {
        let mut image = RgbaImage::new(3, 1);
        image.put_pixel(0, 0, Rgba([10, 20, 30, 255]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 0]));
        image.put_pixel(2, 0, Rgba([200, 0, 100, 51]));
        let blended = blend_over(&image, [250, 250, 0]);

        assert_eq!(blended.get_pixel(0, 0), &Rgb([10, 20, 30]));
        assert_eq!(blended.get_pixel(1, 0), &Rgb([250, 250, 0]));
        // a = 0.2: 200*0.2 + 250*0.8 = 240, 0 + 200 = 200, 20 + 0 = 20
        assert_eq!(blended.get_pixel(2, 0), &Rgb([240, 200, 20]));
    }

    #[test]
    fn test_one_output_per_background_in_order() {
        let backgrounds = vec![
            BackgroundSpec::Transparent,
            BackgroundSpec::PresetColor(PresetColor::White),
            "#00ff00".parse().unwrap(),
        ];
        let outputs = Compositor::default()
            .composite(&foreground(), &backgrounds)
            .unwrap();

        assert_eq!(outputs.len(), 3);
        for (output, background) in outputs.iter().zip(&backgrounds) {
            assert_eq!(&output.background, background);
            assert_eq!(output.dimensions(), (20, 10));
        }
        assert_eq!(outputs[0].mime_type(), "image/png");
        assert_eq!(outputs[1].mime_type(), "image/jpeg");
        assert!(matches!(outputs[1].raster, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_transparent_output_preserves_alpha() {
        let fg = foreground();
        let output = Compositor::default()
            .composite_one(&fg.image, BackgroundSpec::Transparent)
            .unwrap();
        let decoded = image::load_from_memory(&output.bytes).unwrap().to_rgba8();
        assert_eq!(decoded, fg.image);
    }

    #[test]
    fn test_transparent_recomposite_is_byte_identical() {
        let compositor = Compositor::default();
        let first = compositor
            .composite_one(&foreground().image, BackgroundSpec::Transparent)
            .unwrap();
        let decoded = image::load_from_memory(&first.bytes).unwrap().to_rgba8();
        let second = compositor
            .composite_one(&decoded, BackgroundSpec::Transparent)
            .unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn test_solid_output_is_opaque_jpeg() {
        let output = Compositor::new(90)
            .composite_one(&foreground().image, "FF00AA".parse().unwrap())
            .unwrap();
        assert_eq!(output.encoding, OutputEncoding::Jpeg);
        let decoded = image::load_from_memory(&output.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
        assert_eq!(&output.bytes[..2], &[0xFF, 0xD8]);
    }
}
