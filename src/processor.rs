//! Background swap processing pipeline
//!
//! [`ProcessingPipeline`] runs one job through size guarding, the extraction
//! fallback chain and compositing, and reports a structured outcome. It holds
//! no per-job state, so a single pipeline can serve concurrent callers.

use crate::{
    config::PipelineConfig,
    error::{BgSwapError, Result},
    extraction::{MethodKind, MethodRegistry},
    inference::BackendFactory,
    selector::{MethodSelector, SelectionOutcome},
    services::Compositor,
    size_guard::SizeGuard,
    types::{
        BackgroundSpec, JobState, OptimizedImage, ProcessingFailure, ProcessingOutcome,
        ProcessingReport, ProcessingTimings, SourceImage,
    },
    utils::validation::UploadPolicy,
};
use chrono::Utc;
use image::DynamicImage;
use instant::Instant;
use log::{debug, info, warn};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug as trace_debug, info as trace_info, instrument, span, Level};

/// Visited job states, checked against the legal transitions
#[derive(Debug)]
struct StateTrail {
    states: Vec<JobState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![JobState::Received],
        }
    }

    fn current(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Received)
    }

    fn advance(&mut self, next: JobState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        trace_debug!(from = ?current, to = ?next, "Job state transition");
        self.states.push(next);
    }
}

/// Facts about the optimized image kept for the report
struct OptimizationSummary {
    original_dimensions: (u32, u32),
    processed_dimensions: (u32, u32),
    downscaled: bool,
    scale_factor: f32,
    optimization_error: Option<String>,
}

impl OptimizationSummary {
    fn split(optimized: OptimizedImage) -> (Self, DynamicImage) {
        let summary = Self {
            original_dimensions: optimized.original_dimensions,
            processed_dimensions: optimized.dimensions(),
            downscaled: optimized.downscaled,
            scale_factor: optimized.scale_factor,
            optimization_error: optimized.optimization_error,
        };
        (summary, optimized.image)
    }
}

/// Orchestrates size guard, method selection and compositing for each job
#[derive(Debug)]
pub struct ProcessingPipeline {
    config: PipelineConfig,
    size_guard: SizeGuard,
    selector: MethodSelector,
    compositor: Compositor,
}

impl ProcessingPipeline {
    /// Create a pipeline with the built-in methods and compiled-in backends
    ///
    /// Method availability is probed here, once.
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let registry = MethodRegistry::from_config(&config);
        Self::with_registry(config, registry)
    }

    /// Create a pipeline whose model method uses a custom backend factory
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_backend_factory(
        config: PipelineConfig,
        backend_factory: Arc<dyn BackendFactory>,
    ) -> Result<Self> {
        let registry = MethodRegistry::from_config_with_factory(&config, backend_factory);
        Self::with_registry(config, registry)
    }

    /// Create a pipeline over an explicit set of extraction methods
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_registry(config: PipelineConfig, registry: MethodRegistry) -> Result<Self> {
        config.validate()?;
        info!("Initializing processing pipeline (mode: {})", config.mode);

        let selector = MethodSelector::new(registry);
        debug!("Method availability: {:?}", selector.availability());

        Ok(Self {
            size_guard: SizeGuard::new(config.size_guard.clone()),
            compositor: Compositor::new(config.jpeg_quality),
            selector,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Availability of each registered method, probed at construction
    #[must_use]
    pub fn available_methods(&self) -> &BTreeMap<MethodKind, bool> {
        self.selector.availability()
    }

    /// Methods the configured mode would attempt, in order
    ///
    /// # Errors
    /// - Forced method is unavailable
    pub fn attempt_plan(&self) -> Result<Vec<MethodKind>> {
        self.selector.attempt_plan(&self.config.mode)
    }

    /// Process one decoded image against every requested background
    ///
    /// Validation and configuration problems are returned as `Err` before any
    /// extraction work. Exhausting all methods or failing to encode yields
    /// `Ok(ProcessingOutcome::Failure)` with the full audit trail.
    ///
    /// # Errors
    /// - Image below the minimum dimensions or above the byte limit
    /// - No backgrounds requested
    /// - Forced extraction method unavailable
    #[instrument(
        skip(self, source, backgrounds),
        fields(
            mode = %self.config.mode,
            dimensions = ?source.dimensions(),
            backgrounds = backgrounds.len()
        )
    )]
    pub fn process(
        &self,
        source: SourceImage,
        backgrounds: &[BackgroundSpec],
    ) -> Result<ProcessingOutcome> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let mut trail = StateTrail::new();

        if backgrounds.is_empty() {
            return Err(BgSwapError::validation("At least one background is required"));
        }
        self.size_guard.check(&source)?;
        let plan = self.selector.attempt_plan(&self.config.mode)?;

        trace_info!(
            plan = ?plan,
            backgrounds = backgrounds.len(),
            "🎯 Starting background swap"
        );

        trail.advance(JobState::Optimizing);
        let optimize_start = Instant::now();
        let optimized = {
            let _span = span!(Level::DEBUG, "optimize").entered();
            self.size_guard.optimize(source)
        };
        timings.optimize_ms = optimize_start.elapsed().as_millis() as u64;
        let (summary, image) = OptimizationSummary::split(optimized);
        let image = Arc::new(image);

        trail.advance(JobState::Extracting);
        let extraction_start = Instant::now();
        let selection = {
            let _span = span!(Level::INFO, "extraction", methods = plan.len()).entered();
            self.selector.run(&plan, &image)
        };
        timings.extraction_ms = extraction_start.elapsed().as_millis() as u64;

        let SelectionOutcome { result, attempts } = selection;
        let Some(foreground) = result else {
            trail.advance(JobState::Failed);
            timings.total_ms = total_start.elapsed().as_millis() as u64;
            let errors: Vec<_> = attempts.iter().filter_map(|a| a.error().cloned()).collect();
            let reason = self.exhausted_reason(&errors);
            warn!("❌ {reason}");
            let report = Self::report(trail, attempts, summary, timings);
            return Ok(ProcessingOutcome::Failure(ProcessingFailure {
                reason,
                failed_in: JobState::Extracting,
                attempted: report.attempted_methods(),
                errors,
                report,
            }));
        };
        let method = foreground.method;

        trail.advance(JobState::Compositing);
        let compositing_start = Instant::now();
        let composited = {
            let _span = span!(Level::DEBUG, "compositing", method = %method).entered();
            self.compositor.composite(&foreground, backgrounds)
        };
        timings.compositing_ms = compositing_start.elapsed().as_millis() as u64;

        match composited {
            Ok(outputs) => {
                trail.advance(JobState::Completed);
                timings.total_ms = total_start.elapsed().as_millis() as u64;
                info!(
                    "✅ Completed with {} in {}ms ({} outputs)",
                    method,
                    timings.total_ms,
                    outputs.len()
                );
                Ok(ProcessingOutcome::Success {
                    outputs,
                    method,
                    report: Self::report(trail, attempts, summary, timings),
                })
            },
            Err(e) => {
                trail.advance(JobState::Failed);
                timings.total_ms = total_start.elapsed().as_millis() as u64;
                warn!("❌ Compositing failed: {e}");
                let report = Self::report(trail, attempts, summary, timings);
                Ok(ProcessingOutcome::Failure(ProcessingFailure {
                    reason: e.to_string(),
                    failed_in: JobState::Compositing,
                    attempted: report.attempted_methods(),
                    errors: Vec::new(),
                    report,
                }))
            },
        }
    }

    /// Process a raster that did not come from an upload
    ///
    /// # Errors
    /// - As [`ProcessingPipeline::process`]
    pub fn process_image(
        &self,
        image: DynamicImage,
        backgrounds: &[BackgroundSpec],
    ) -> Result<ProcessingOutcome> {
        self.process(SourceImage::new(image, 0, None), backgrounds)
    }

    /// Validate, decode and process encoded image bytes
    ///
    /// The upload policy (format allow-list, byte limit, dimension range) is
    /// applied before and after decoding.
    ///
    /// # Errors
    /// - Upload policy violations
    /// - Undecodable image data
    /// - As [`ProcessingPipeline::process`]
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        backgrounds: &[BackgroundSpec],
    ) -> Result<ProcessingOutcome> {
        let policy = self.upload_policy();
        let format = policy.check_bytes(bytes)?;
        debug!("Decoding {} bytes as {:?}", bytes.len(), format);

        let source = SourceImage::decode(bytes)?;
        let (width, height) = source.dimensions();
        policy.check_dimensions(width, height)?;
        self.process(source, backgrounds)
    }

    /// Read an image from an async stream and process it off the async runtime
    ///
    /// At most `max_upload_bytes + 1` bytes are buffered; a longer stream is
    /// rejected without reading the rest.
    ///
    /// # Errors
    /// - Stream read failures
    /// - Stream longer than the upload ceiling
    /// - As [`ProcessingPipeline::process_bytes`]
    pub async fn process_reader<R: tokio::io::AsyncRead + Unpin>(
        self: &Arc<Self>,
        reader: R,
        backgrounds: Vec<BackgroundSpec>,
    ) -> Result<ProcessingOutcome> {
        use tokio::io::AsyncReadExt;

        // One byte past the ceiling is enough to tell an oversized stream apart
        let policy = self.upload_policy();
        let mut buffer = Vec::new();
        let mut limited = reader.take(policy.max_bytes.saturating_add(1));
        limited.read_to_end(&mut buffer).await?;
        policy.check_size(buffer.len() as u64)?;

        let pipeline = Arc::clone(self);
        tokio::task::spawn_blocking(move || pipeline.process_bytes(&buffer, &backgrounds))
            .await
            .map_err(|e| BgSwapError::internal(format!("Processing task failed: {e}")))?
    }

    /// Upload policy matching this pipeline's size guard
    #[must_use]
    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_bytes: self.config.size_guard.max_upload_bytes,
            min_dimension: self.config.size_guard.min_dimension,
            ..UploadPolicy::default()
        }
    }

    /// Failure message naming the last-resort cause
    ///
    /// In debug mode every method's error is listed as well.
    fn exhausted_reason(&self, errors: &[crate::error::ExtractionError]) -> String {
        let summary = BgSwapError::exhausted(errors.to_vec()).to_string();
        if !self.config.debug || errors.is_empty() {
            return summary;
        }
        let detail: Vec<String> = errors.iter().map(ToString::to_string).collect();
        format!("{summary} [attempts: {}]", detail.join("; "))
    }

    fn report(
        trail: StateTrail,
        attempts: Vec<crate::types::MethodAttempt>,
        summary: OptimizationSummary,
        timings: ProcessingTimings,
    ) -> ProcessingReport {
        ProcessingReport {
            states: trail.states,
            attempts,
            original_dimensions: summary.original_dimensions,
            processed_dimensions: summary.processed_dimensions,
            downscaled: summary.downscaled,
            scale_factor: summary.scale_factor,
            optimization_error: summary.optimization_error,
            timings,
            completed_at: Utc::now(),
        }
    }
}
