//! Model input preparation and output mapping
//!
//! Images are resized aspect-preserving onto a square padded canvas and
//! normalized into an NCHW tensor. The same geometry is kept so the model's
//! saliency map can be cropped back to the image area and resized to the
//! source dimensions.

use crate::{
    error::{BgSwapError, Result},
    models::PreprocessingConfig,
    utils::validation::TensorValidator,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use ndarray::Array4;

/// Configuration for preprocessing behavior
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    /// Padding color for aspect ratio preservation (RGB)
    pub padding_color: [u8; 3],
    /// Filter used to shrink or enlarge the image onto the canvas
    pub filter: FilterType,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255], // White padding
            filter: FilterType::Triangle,
        }
    }
}

/// Geometry of the image inside the model canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformation {
    /// Scale factor used during preprocessing
    pub scale: f32,
    /// X offset for centering
    pub offset_x: u32,
    /// Y offset for centering
    pub offset_y: u32,
    /// Size of the image area inside the canvas
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Canvas side length
    pub target_size: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl CoordinateTransformation {
    /// Compute the fit of `original` into a `target_size` square
    ///
    /// # Errors
    /// - Zero-sized image or canvas
    pub fn fit(original: (u32, u32), target_size: u32) -> Result<Self> {
        let (orig_width, orig_height) = original;
        if orig_width == 0 || orig_height == 0 || target_size == 0 {
            return Err(BgSwapError::internal(format!(
                "Cannot fit {orig_width}x{orig_height} into a {target_size}px canvas"
            )));
        }

        let target_size_f32 = target_size as f32;
        let scale = (target_size_f32 / orig_width as f32).min(target_size_f32 / orig_height as f32);

        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_size);

        Ok(Self {
            scale,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
            scaled_width,
            scaled_height,
            target_size,
            original_width: orig_width,
            original_height: orig_height,
        })
    }
}

/// Model input tensor plus the geometry needed to invert it
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub tensor: Array4<f32>,
    pub transformation: CoordinateTransformation,
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image for model inference
    ///
    /// Handles RGB conversion, aspect-preserving resize, center padding and
    /// normalization to NCHW.
    ///
    /// # Errors
    /// - Zero-sized image or target size
    pub fn preprocess_image(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<PreparedInput> {
        let target_size = preprocessing_config.target_size[0];
        let rgb_image = image.to_rgb8();
        let transformation = CoordinateTransformation::fit(rgb_image.dimensions(), target_size)?;

        let resized = image::imageops::resize(
            &rgb_image,
            transformation.scaled_width,
            transformation.scaled_height,
            options.filter,
        );

        let padding = options.padding_color;
        let mut canvas = ImageBuffer::from_pixel(
            target_size,
            target_size,
            image::Rgb([padding[0], padding[1], padding[2]]),
        );
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(transformation.offset_x),
            i64::from(transformation.offset_y),
        );

        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config, target_size as usize);
        Ok(PreparedInput {
            tensor,
            transformation,
        })
    }

    /// Preprocess with default options
    ///
    /// # Errors
    /// - Zero-sized image or target size
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<PreparedInput> {
        Self::preprocess_image(image, preprocessing_config, &PreprocessingOptions::default())
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
        target_size: usize,
    ) -> Array4<f32> {
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;
        let mut tensor = Array4::<f32>::zeros((1, 3, target_size, target_size));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
            }
        }

        tensor
    }

    /// Map a `[1, 1, S, S]` saliency tensor back to a mask of the original size
    ///
    /// Values are min-max normalized over the image area first, so models
    /// emitting unnormalized saliency still span the full alpha range.
    ///
    /// # Errors
    /// - Tensor is not single batch, single channel
    /// - Tensor spatial size differs from the canvas it was computed for
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        transformation: &CoordinateTransformation,
    ) -> Result<GrayImage> {
        TensorValidator::check_mask(tensor, transformation.target_size as usize)?;

        let x0 = transformation.offset_x as usize;
        let y0 = transformation.offset_y as usize;
        let width = transformation.scaled_width as usize;
        let height = transformation.scaled_height as usize;

        let region = tensor.slice(ndarray::s![0, 0, y0..y0 + height, x0..x0 + width]);

        let (min, max) = region
            .iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = max - min;
        let normalize = |v: f32| -> f32 {
            if !v.is_finite() {
                0.0
            } else if range > 1e-6 {
                (v - min) / range
            } else {
                v.clamp(0.0, 1.0)
            }
        };

        let mut cropped = GrayImage::new(transformation.scaled_width, transformation.scaled_height);
        for ((y, x), &value) in region.indexed_iter() {
            let level = (normalize(value) * 255.0).round().clamp(0.0, 255.0) as u8;
            cropped.put_pixel(x as u32, y as u32, Luma([level]));
        }

        if cropped.dimensions() == (transformation.original_width, transformation.original_height)
        {
            return Ok(cropped);
        }

        Ok(image::imageops::resize(
            &cropped,
            transformation.original_width,
            transformation.original_height,
            FilterType::Triangle,
        ))
    }
}
