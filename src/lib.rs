#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY Background Swap Library
//!
//! Isolates the subject of a photo and composites it onto new backgrounds.
//!
//! Three extraction methods share one contract and are tried in priority
//! order until one succeeds:
//!
//! - **Model**: segmentation with a pretrained ONNX model (Tract or ONNX Runtime)
//! - **Contour**: edge detection and filled outer contours
//! - **Corner color**: color distance from the sampled image corners, never fails
//!
//! Each successful foreground is composited onto every requested background:
//! transparent backgrounds are encoded as PNG, solid colors as opaque JPEG.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_bgswap::{process_bytes, PipelineConfig};
//!
//! # fn example(upload: Vec<u8>) -> anyhow::Result<()> {
//! let config = PipelineConfig::default();
//! let outcome = process_bytes(&upload, &["transparent", "white", "#00ff00"], &config)?;
//! for output in outcome.into_result()? {
//!     std::fs::write(output.file_name("photo"), &output.bytes)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Reusing a pipeline
//!
//! Method availability is probed once when the pipeline is built, so
//! long-lived callers should keep one [`ProcessingPipeline`] around:
//!
//! ```rust,no_run
//! use imgly_bgswap::{BackgroundSpec, ExtractionMode, MethodKind, PipelineConfig, ProcessingPipeline};
//!
//! # fn example(upload: &[u8]) -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .mode(ExtractionMode::Forced(MethodKind::Contour))
//!     .soft_edge_px(3.0)
//!     .build()?;
//! let pipeline = ProcessingPipeline::new(config)?;
//! let outcome = pipeline.process_bytes(upload, &[BackgroundSpec::Transparent])?;
//! println!("{}", outcome.report().to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): pure Rust inference backend
//! - `onnx`: ONNX Runtime inference backend
//! - `cli` (default): the `imgly-bgswap` command-line tool
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`, `tracing-files`: extra CLI log outputs

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod extraction;
pub mod inference;
pub mod models;
pub mod processor;
pub mod selector;
pub mod services;
pub mod size_guard;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

use std::sync::Arc;
use tokio::io::AsyncRead;

// Public API exports
pub use backends::*;
pub use config::{
    BackendType, ContourConfig, CornerColorConfig, ExtractionMode, ModelConfig, PipelineConfig,
    PipelineConfigBuilder, SizeGuardConfig,
};
pub use error::{BgSwapError, ExtractionError, Result};
pub use extraction::{
    ContourExtractor, CornerColorExtractor, ExtractionMethod, MethodKind, MethodRegistry,
    ModelExtractor,
};
pub use inference::{BackendFactory, DefaultBackendFactory, InferenceBackend};
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use processor::ProcessingPipeline;
pub use selector::{MethodSelector, SelectionOutcome};
pub use services::{Compositor, OutputFormatHandler};
pub use size_guard::SizeGuard;
pub use types::{
    BackgroundSpec, CompositedOutput, ExtractionResult, HexColor, JobState, MethodAttempt,
    OptimizedImage, OutputEncoding, PresetColor, ProcessingFailure, ProcessingOutcome,
    ProcessingReport, SourceImage,
};
pub use utils::{ImagePreprocessor, PreprocessingOptions, TensorValidator, UploadPolicy};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput};

/// Swap the background of an encoded image
///
/// Background strings are parsed before the image is decoded, so a bad color
/// is reported without any extraction work.
///
/// # Arguments
///
/// * `image_bytes` - Encoded JPEG, PNG, WebP, BMP or TIFF data
/// * `backgrounds` - `transparent`, a preset name or a hex color, one output each
/// * `config` - Pipeline configuration
///
/// # Errors
/// - `Validation` for bad background strings, upload size or dimensions
/// - `Configuration` for invalid configuration or an unavailable forced method
pub fn process_bytes<S: AsRef<str>>(
    image_bytes: &[u8],
    backgrounds: &[S],
    config: &PipelineConfig,
) -> Result<ProcessingOutcome> {
    let backgrounds = BackgroundSpec::parse_all(backgrounds)?;
    let pipeline = ProcessingPipeline::new(config.clone())?;
    pipeline.process_bytes(image_bytes, &backgrounds)
}

/// Swap the background of an image read from an async stream
///
/// The stream is read to the end and the pipeline runs on the blocking pool.
///
/// # Examples
/// ```rust,no_run
/// use imgly_bgswap::{process_reader, PipelineConfig};
/// use tokio::fs::File;
///
/// # async fn example() -> anyhow::Result<()> {
/// let file = File::open("portrait.jpg").await?;
/// let outcome = process_reader(file, &["white"], &PipelineConfig::default()).await?;
/// assert!(outcome.is_success());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - Stream read failures
/// - As [`process_bytes`]
pub async fn process_reader<R: AsyncRead + Unpin, S: AsRef<str>>(
    reader: R,
    backgrounds: &[S],
    config: &PipelineConfig,
) -> Result<ProcessingOutcome> {
    let backgrounds = BackgroundSpec::parse_all(backgrounds)?;
    let pipeline = Arc::new(ProcessingPipeline::new(config.clone())?);
    pipeline.process_reader(reader, backgrounds).await
}
