//! Shared utilities
//!
//! - Model input preparation and saliency-to-mask mapping
//! - Boundary validation for uploads and tensors

pub mod preprocessing;
pub mod validation;

pub use preprocessing::{
    CoordinateTransformation, ImagePreprocessor, PreparedInput, PreprocessingOptions,
};
pub use validation::{TensorValidator, UploadPolicy};
