//! Boundary policy for uploaded images
//!
//! Callers apply these checks before handing data to the pipeline: format
//! allow-list, upload size ceiling, and the accepted dimension range.

use crate::error::{BgSwapError, Result};
use image::ImageFormat;
use std::path::Path;

/// Formats accepted at the boundary
pub const ALLOWED_FORMATS: [ImageFormat; 5] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
];

/// Upload limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub min_dimension: u32,
    pub max_dimension: u32,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 25 * 1024 * 1024,
            min_dimension: 50,
            max_dimension: 6000,
        }
    }
}

impl UploadPolicy {
    /// Check a declared size and MIME type before reading any pixels
    ///
    /// # Errors
    /// - Size above the ceiling
    /// - MIME type outside the allow-list
    pub fn check_declared(&self, byte_size: u64, mime_type: &str) -> Result<ImageFormat> {
        self.check_size(byte_size)?;
        let format = ImageFormat::from_mime_type(mime_type)
            .filter(|f| ALLOWED_FORMATS.contains(f))
            .ok_or_else(|| {
                BgSwapError::validation(format!(
                    "Unsupported image type '{mime_type}'. Allowed: {}",
                    Self::allowed_mime_types().join(", ")
                ))
            })?;
        Ok(format)
    }

    /// Check raw bytes: size ceiling and sniffed format
    ///
    /// # Errors
    /// - Size above the ceiling
    /// - Unrecognized or disallowed format
    pub fn check_bytes(&self, bytes: &[u8]) -> Result<ImageFormat> {
        self.check_size(bytes.len() as u64)?;
        let format = image::guess_format(bytes)
            .map_err(|_| BgSwapError::validation("Unrecognized image data"))?;
        if !ALLOWED_FORMATS.contains(&format) {
            return Err(BgSwapError::validation(format!(
                "Unsupported image type '{}'. Allowed: {}",
                format.to_mime_type(),
                Self::allowed_mime_types().join(", ")
            )));
        }
        Ok(format)
    }

    /// Check decoded dimensions against the accepted range
    ///
    /// # Errors
    /// - Either side below the minimum or above the maximum
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<()> {
        if width < self.min_dimension || height < self.min_dimension {
            return Err(BgSwapError::dimension_error(
                width,
                height,
                &format!(
                    "minimum is {}x{}",
                    self.min_dimension, self.min_dimension
                ),
            ));
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(BgSwapError::dimension_error(
                width,
                height,
                &format!(
                    "maximum is {}x{}",
                    self.max_dimension, self.max_dimension
                ),
            ));
        }
        Ok(())
    }

    /// Check a byte count against the upload ceiling
    ///
    /// # Errors
    /// - Size above the ceiling
    pub fn check_size(&self, byte_size: u64) -> Result<()> {
        if byte_size > self.max_bytes {
            return Err(BgSwapError::validation(format!(
                "Upload of {} bytes exceeds the {} byte limit",
                byte_size, self.max_bytes
            )));
        }
        Ok(())
    }

    /// Whether a path has an extension of an allowed format
    #[must_use]
    pub fn is_supported_path(path: &Path) -> bool {
        ImageFormat::from_path(path).is_ok_and(|f| ALLOWED_FORMATS.contains(&f))
    }

    #[must_use]
    pub fn allowed_mime_types() -> Vec<&'static str> {
        ALLOWED_FORMATS.iter().map(|f| f.to_mime_type()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_declared_mime_allow_list() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.check_declared(1000, "image/jpeg").unwrap(), ImageFormat::Jpeg);
        assert_eq!(policy.check_declared(1000, "image/webp").unwrap(), ImageFormat::WebP);
        assert!(policy.check_declared(1000, "image/gif").is_err());
        assert!(policy.check_declared(1000, "text/plain").is_err());
    }

    #[test]
    fn test_size_ceiling() {
        let policy = UploadPolicy::default();
        assert!(policy.check_declared(25 * 1024 * 1024, "image/png").is_ok());
        assert!(matches!(
            policy.check_declared(25 * 1024 * 1024 + 1, "image/png"),
            Err(BgSwapError::Validation(_))
        ));
    }

    #[test]
    fn test_check_bytes_sniffs_format() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.check_bytes(&png_bytes(60, 60)).unwrap(), ImageFormat::Png);
        assert!(policy.check_bytes(b"definitely not an image").is_err());

        let tiny = UploadPolicy {
            max_bytes: 10,
            ..UploadPolicy::default()
        };
        assert!(tiny.check_bytes(&png_bytes(60, 60)).is_err());
    }

    #[test]
    fn test_dimension_range() {
        let policy = UploadPolicy::default();
        assert!(policy.check_dimensions(50, 50).is_ok());
        assert!(policy.check_dimensions(6000, 6000).is_ok());
        assert!(policy.check_dimensions(49, 100).is_err());
        assert!(policy.check_dimensions(100, 6001).is_err());
    }

    #[test]
    fn test_supported_paths() {
        assert!(UploadPolicy::is_supported_path(Path::new("photo.JPG")));
        assert!(UploadPolicy::is_supported_path(Path::new("scan.tiff")));
        assert!(!UploadPolicy::is_supported_path(Path::new("anim.gif")));
        assert!(!UploadPolicy::is_supported_path(Path::new("README")));
    }
}
