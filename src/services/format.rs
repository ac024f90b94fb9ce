//! Output format handling service
//!
//! Keeps encoding decisions and encoder setup out of the compositing logic.

use crate::{
    error::{BgSwapError, Result},
    types::{BackgroundSpec, OutputEncoding},
};
use image::{
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType as PngFilterType, PngEncoder},
    },
    ExtendedColorType, ImageEncoder, RgbImage, RgbaImage,
};

/// Service for choosing and running output encoders
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encoding for a background: lossless PNG when transparent, JPEG otherwise
    ///
    /// # Examples
    /// ```rust
    /// use imgly_bgswap::{services::OutputFormatHandler, BackgroundSpec, OutputEncoding};
    ///
    /// assert_eq!(
    ///     OutputFormatHandler::encoding_for(&BackgroundSpec::Transparent),
    ///     OutputEncoding::Png
    /// );
    /// ```
    #[must_use]
    pub fn encoding_for(background: &BackgroundSpec) -> OutputEncoding {
        if background.is_transparent() {
            OutputEncoding::Png
        } else {
            OutputEncoding::Jpeg
        }
    }

    /// Encode RGBA as PNG with fixed encoder settings
    ///
    /// The same pixels always produce the same bytes.
    ///
    /// # Errors
    /// - Encoder failure
    pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        PngEncoder::new_with_quality(&mut bytes, CompressionType::Default, PngFilterType::Adaptive)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgba8,
            )
            .map_err(|e| BgSwapError::encoding(format!("PNG encoding failed: {e}")))?;
        Ok(bytes)
    }

    /// Encode RGB as baseline JPEG
    ///
    /// # Errors
    /// - Quality outside 1-100
    /// - Encoder failure
    pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
        if !(1..=100).contains(&quality) {
            return Err(BgSwapError::config_value_error(
                "jpeg_quality",
                quality,
                "1-100",
                Some(95),
            ));
        }

        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality)
            .write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| BgSwapError::encoding(format!("JPEG encoding failed: {e}")))?;
        Ok(bytes)
    }

    /// Get the recommended quality range for an encoding
    ///
    /// Returns `(default, min, max)`, or `None` for lossless encodings.
    #[must_use]
    pub fn get_quality_range(encoding: OutputEncoding) -> Option<(u8, u8, u8)> {
        match encoding {
            OutputEncoding::Jpeg => Some((95, 1, 100)),
            OutputEncoding::Png => None,
        }
    }
}
