//! Error types for background swap operations

use crate::extraction::MethodKind;
use thiserror::Error;

/// Result type alias for background swap operations
pub type Result<T> = std::result::Result<T, BgSwapError>;

/// A single extraction method failed for one image.
///
/// This is a recoverable error: the method selector records it and moves on
/// to the next method in the attempt list.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[error("{method} extraction failed: {cause}")]
pub struct ExtractionError {
    pub method: MethodKind,
    pub cause: String,
}

impl ExtractionError {
    pub fn new<S: Into<String>>(method: MethodKind, cause: S) -> Self {
        Self {
            method,
            cause: cause.into(),
        }
    }
}

/// Comprehensive error types for background swap operations
#[derive(Error, Debug)]
pub enum BgSwapError {
    /// Input rejected at the boundary (dimensions, byte size, color string, format)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration or a forced method that cannot run
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One extraction method failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Every attempted extraction method failed
    #[error("All extraction methods failed: {summary}")]
    ExtractionExhausted {
        summary: String,
        errors: Vec<ExtractionError>,
    },

    /// Compositing or encoding of an output artifact failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Model loading or resolution errors
    #[error("Model error: {0}")]
    Model(String),

    /// Backend inference errors
    #[error("Inference error: {0}")]
    Inference(String),

    /// Input/output errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgSwapError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new encoding error
    pub fn encoding<S: Into<String>>(msg: S) -> Self {
        Self::Encoding(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an exhausted-chain error; the summary names the last cause only
    #[must_use]
    pub fn exhausted(errors: Vec<ExtractionError>) -> Self {
        let summary = errors.last().map_or_else(
            || "no extraction method was attempted".to_string(),
            ToString::to_string,
        );
        Self::ExtractionExhausted { summary, errors }
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::Configuration(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Create a dimension validation error
    pub fn dimension_error(width: u32, height: u32, constraint: &str) -> Self {
        Self::Validation(format!(
            "Image dimensions {}x{} rejected: {}",
            width, height, constraint
        ))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        Self::Io(std::io::Error::new(
            error.kind(),
            format!(
                "Failed to {} '{}': {}",
                operation,
                path.as_ref().display(),
                error
            ),
        ))
    }

    /// Create model error with troubleshooting context
    pub fn model_error_with_context<P: AsRef<std::path::Path>>(
        operation: &str,
        model_path: P,
        error: &str,
        suggestions: &[&str],
    ) -> Self {
        let suggestion_text = if suggestions.is_empty() {
            String::new()
        } else {
            format!(" Suggestions: {}", suggestions.join(", "))
        };

        Self::Model(format!(
            "Failed to {} model '{}': {}.{}",
            operation,
            model_path.as_ref().display(),
            error,
            suggestion_text
        ))
    }

    /// Whether this error must be surfaced without entering the fallback chain
    #[must_use]
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Configuration(_))
    }
}
