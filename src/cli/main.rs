//! Background swap CLI tool
//!
//! Command-line interface that runs the processing pipeline over files and
//! directories and writes one artifact per requested background.

use super::config::CliConfigBuilder;
use crate::{
    config::{BackendType, ExtractionMode},
    extraction::MethodKind,
    processor::ProcessingPipeline,
    tracing_config::{init_cli_tracing, spans},
    types::{BackgroundSpec, ProcessingOutcome, ProcessingReport},
    utils::UploadPolicy,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use instant::Instant;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

/// Swap image backgrounds using model, contour or corner-color extraction
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-bgswap")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required_unless_present = "show_methods")]
    pub input: Vec<String>,

    /// Output directory [default: next to each input]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Extraction method; `auto` falls back through all available methods
    #[arg(long, value_enum)]
    pub method: Option<CliMethod>,

    /// Background: transparent, white, black, gray or a hex color (repeatable)
    #[arg(short, long = "background", value_name = "SPEC", default_value = "transparent")]
    pub backgrounds: Vec<String>,

    /// Model folder, .onnx file, or cached model id
    #[arg(short, long)]
    pub model: Option<String>,

    /// Inference backend for the model method
    #[arg(long, value_enum)]
    pub backend: Option<CliBackend>,

    /// Model extraction timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub model_timeout: Option<f64>,

    /// Long edge above which inputs are downscaled
    #[arg(long, value_name = "PX")]
    pub max_edge: Option<u32>,

    /// Corner-color distance below which a pixel is background
    #[arg(long)]
    pub color_threshold: Option<f32>,

    /// Width of the corner-color alpha ramp above the threshold
    #[arg(long)]
    pub color_ramp: Option<f32>,

    /// Also sample edge midpoints for the corner-color method
    #[arg(long)]
    pub edge_midpoints: bool,

    /// Contour mask edge softening in pixels
    #[arg(long, value_name = "PX")]
    pub soft_edge: Option<f32>,

    /// JPEG quality for solid-color backgrounds (1-100)
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// JSON pipeline configuration; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print a JSON report of every job to stdout
    #[arg(long)]
    pub report: bool,

    /// Show probed method availability and exit
    #[arg(long)]
    pub show_methods: bool,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliMethod {
    Auto,
    Model,
    Contour,
    CornerColor,
}

impl From<CliMethod> for ExtractionMode {
    fn from(method: CliMethod) -> Self {
        match method {
            CliMethod::Auto => Self::Auto,
            CliMethod::Model => Self::Forced(MethodKind::Model),
            CliMethod::Contour => Self::Forced(MethodKind::Contour),
            CliMethod::CornerColor => Self::Forced(MethodKind::CornerColor),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliBackend {
    Tract,
    Onnx,
}

impl From<CliBackend> for BackendType {
    fn from(backend: CliBackend) -> Self {
        match backend {
            CliBackend::Tract => Self::Tract,
            CliBackend::Onnx => Self::Onnx,
        }
    }
}

/// Per-file entry of the `--report` output
#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    success: bool,
    method: Option<MethodKind>,
    outputs: Vec<PathBuf>,
    reason: Option<String>,
    report: Option<ProcessingReport>,
}

impl FileReport {
    fn error(input: &Path, reason: String) -> Self {
        Self {
            input: input.to_path_buf(),
            success: false,
            method: None,
            outputs: Vec::new(),
            reason: Some(reason),
            report: None,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing_guard = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;
    let backgrounds = CliConfigBuilder::backgrounds(&cli).context("Invalid background")?;

    info!("Starting background swap CLI");
    info!("Mode: {}, backgrounds: {}", config.mode, cli.backgrounds.join(", "));

    let pipeline = Arc::new(
        ProcessingPipeline::new(config).context("Failed to create processing pipeline")?,
    );

    if cli.show_methods {
        show_methods(&pipeline);
        return Ok(());
    }

    let files = collect_inputs(&cli)?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    info!("Found {} image file(s) to process", files.len());
    warn_on_name_collisions(&files);

    if let Some(dir) = &cli.output {
        prepare_output_dir(dir)?;
    }

    let start_time = Instant::now();
    let reports = process_files(&pipeline, &files, &backgrounds)
        .instrument(spans::batch_processing(files.len(), &pipeline.config().mode.to_string()))
        .await?;

    let failed = reports.iter().filter(|r| !r.success).count();
    info!(
        "Processed {} image(s) in {:.2}s, {} failed",
        reports.len() - failed,
        start_time.elapsed().as_secs_f64(),
        failed
    );

    if cli.report {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialize report")?;
        println!("{json}");
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} file(s) failed", reports.len());
    }
    Ok(())
}

/// Print probed availability and the attempt plan for the configured mode
fn show_methods(pipeline: &ProcessingPipeline) {
    println!("🔍 Extraction methods");
    for (kind, available) in pipeline.available_methods() {
        let status = if *available { "✅ available" } else { "❌ unavailable" };
        println!("  {:<13} {status}", kind.as_str());
    }

    match pipeline.attempt_plan() {
        Ok(plan) => {
            let names: Vec<String> = plan.iter().map(ToString::to_string).collect();
            println!(
                "Attempt order for '{}': {}",
                pipeline.config().mode,
                names.join(" -> ")
            );
        },
        Err(e) => println!("Mode '{}' cannot run: {e}", pipeline.config().mode),
    }
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            dir.display()
        );
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}

async fn process_files(
    pipeline: &Arc<ProcessingPipeline>,
    files: &[InputFile],
    backgrounds: &[BackgroundSpec],
) -> Result<Vec<FileReport>> {
    let progress = if files.len() > 1 {
        let pb = ProgressBar::new(files.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let input = file.path.as_path();
        if let Some(pb) = &progress {
            pb.set_message(format!("Processing {}", input.display()));
        }

        let report = match process_file(pipeline, file, backgrounds)
            .instrument(spans::file_processing(input))
            .await
        {
            Ok(report) => {
                if let Some(reason) = &report.reason {
                    error!("❌ {}: {}", input.display(), reason);
                } else {
                    log::debug!("✅ Processed: {}", input.display());
                }
                report
            },
            Err(e) => {
                error!("❌ Failed to process {}: {:#}", input.display(), e);
                FileReport::error(input, format!("{e:#}"))
            },
        };
        reports.push(report);

        if let Some(pb) = &progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress {
        let failed = reports.iter().filter(|r| !r.success).count();
        pb.finish_with_message(format!(
            "Completed! Processed: {}, Failed: {failed}",
            reports.len() - failed
        ));
    }
    Ok(reports)
}

/// Run one file through the pipeline and write its artifacts
async fn process_file(
    pipeline: &Arc<ProcessingPipeline>,
    file: &InputFile,
    backgrounds: &[BackgroundSpec],
) -> Result<FileReport> {
    let input = file.path.as_path();
    let reader = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let outcome = pipeline
        .process_reader(reader, backgrounds.to_vec())
        .await
        .context("Failed to process image")?;

    match outcome {
        ProcessingOutcome::Success {
            outputs,
            method,
            report,
        } => {
            let dir = &file.output_dir;
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let stem = file.stem();

            let mut written = Vec::with_capacity(outputs.len());
            for output in &outputs {
                let path = dir.join(output.file_name(&stem));
                tokio::fs::write(&path, &output.bytes)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(
                    "💾 {} ({}x{}, {} bytes) via {}",
                    path.display(),
                    output.dimensions().0,
                    output.dimensions().1,
                    output.byte_size(),
                    method
                );
                written.push(path);
            }

            Ok(FileReport {
                input: input.to_path_buf(),
                success: true,
                method: Some(method),
                outputs: written,
                reason: None,
                report: Some(report),
            })
        },
        ProcessingOutcome::Failure(failure) => Ok(FileReport {
            input: input.to_path_buf(),
            success: false,
            method: None,
            outputs: Vec::new(),
            reason: Some(failure.reason),
            report: Some(failure.report),
        }),
    }
}

/// An image to process and the directory its artifacts are written to
#[derive(Debug, Clone, PartialEq, Eq)]
struct InputFile {
    path: PathBuf,
    output_dir: PathBuf,
}

impl InputFile {
    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map_or_else(|| "image".to_string(), |s| s.to_string_lossy().into_owned())
    }
}

/// Artifacts go next to the input, or under `output` mirroring the input's
/// position below the directory it was found in
fn output_dir_for(input: &Path, root: Option<&Path>, output: Option<&Path>) -> PathBuf {
    let parent = input.parent().filter(|p| !p.as_os_str().is_empty());
    match output {
        Some(dir) => {
            let nested = parent
                .zip(root)
                .and_then(|(parent, root)| parent.strip_prefix(root).ok());
            nested.map_or_else(|| dir.to_path_buf(), |rel| dir.join(rel))
        },
        None => parent.map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    }
}

/// Inputs whose artifacts would land on the same file names
fn name_collisions(files: &[InputFile]) -> Vec<(&Path, &Path)> {
    let mut seen: HashMap<(&Path, String), &Path> = HashMap::new();
    let mut collisions = Vec::new();
    for file in files {
        let key = (file.output_dir.as_path(), file.stem());
        if let Some(first) = seen.insert(key, &file.path) {
            collisions.push((first, file.path.as_path()));
        }
    }
    collisions
}

fn warn_on_name_collisions(files: &[InputFile]) {
    for (first, second) in name_collisions(files) {
        warn!(
            "⚠️ {} and {} write the same output names; the later one wins",
            first.display(),
            second.display()
        );
    }
}

/// Expand file and directory inputs into a sorted list of supported images
fn collect_inputs(cli: &Cli) -> Result<Vec<InputFile>> {
    let output = cli.output.as_deref();
    let mut files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);
        if path.is_file() {
            if UploadPolicy::is_supported_path(&path) {
                let output_dir = output_dir_for(&path, None, output);
                files.push(InputFile { path, output_dir });
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for found in find_image_files(&path, cli.recursive, cli.pattern.as_deref())? {
                let output_dir = output_dir_for(&found, Some(&path), output);
                files.push(InputFile {
                    path: found,
                    output_dir,
                });
            }
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    Ok(files)
}

/// Find supported image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if UploadPolicy::is_supported_path(path) && matches_pattern(path, pattern.as_ref()) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Check if the file name matches the given pattern
fn matches_pattern(path: &Path, pattern: Option<&glob::Pattern>) -> bool {
    match pattern {
        Some(pattern) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| pattern.matches(name)),
        None => true,
    }
}
