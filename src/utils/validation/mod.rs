//! Validation utilities
//!
//! - Upload policy applied at the boundary before decoding
//! - Tensor shape checks for model outputs

pub mod tensor;
pub mod upload;

pub use tensor::TensorValidator;
pub use upload::{UploadPolicy, ALLOWED_FORMATS};
