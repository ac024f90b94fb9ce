//! Configuration types for background swap operations

use crate::error::{BgSwapError, Result};
use crate::extraction::MethodKind;
use crate::models::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Extraction mode selector
///
/// `auto` tries every available method in quality order with fallback; a
/// method name forces that method and fails closed when it is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExtractionMode {
    #[default]
    Auto,
    Forced(MethodKind),
}

impl FromStr for ExtractionMode {
    type Err = BgSwapError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized == "auto" {
            return Ok(Self::Auto);
        }
        normalized.parse::<MethodKind>().map(Self::Forced)
    }
}

impl TryFrom<String> for ExtractionMode {
    type Error = BgSwapError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ExtractionMode> for String {
    fn from(mode: ExtractionMode) -> Self {
        mode.to_string()
    }
}

impl std::fmt::Display for ExtractionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Forced(kind) => write!(f, "{kind}"),
        }
    }
}

/// Inference runtime used by the model-based method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime backend
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl Default for BackendType {
    fn default() -> Self {
        if cfg!(feature = "tract") || !cfg!(feature = "onnx") {
            Self::Tract
        } else {
            Self::Onnx
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

impl FromStr for BackendType {
    type Err = BgSwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" | "ort" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgSwapError::configuration(format!(
                "Unknown backend '{other}'. Expected one of: onnx, tract"
            ))),
        }
    }
}

/// Limits applied before any extraction work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeGuardConfig {
    /// Smallest accepted width and height in pixels
    pub min_dimension: u32,
    /// Largest accepted original upload size in bytes
    pub max_upload_bytes: u64,
    /// Long edge above which the image is downscaled
    pub large_image_threshold: u32,
}

impl Default for SizeGuardConfig {
    fn default() -> Self {
        Self {
            min_dimension: 50,
            max_upload_bytes: 25 * 1024 * 1024,
            large_image_threshold: 2000,
        }
    }
}

/// Model-based extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_spec: ModelSpec,
    pub backend: BackendType,
    /// Upper bound on a single model extraction, `None` waits forever
    pub timeout_ms: Option<u64>,
    /// Number of intra-op threads (0 = auto)
    pub intra_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend: BackendType::default(),
            timeout_ms: Some(60_000),
            intra_threads: 0,
        }
    }
}

/// Edge/contour heuristic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContourConfig {
    /// Gaussian sigma applied before edge detection
    pub blur_sigma: f32,
    /// Canny hysteresis thresholds
    pub canny_low: f32,
    pub canny_high: f32,
    /// Chebyshev radius of the closing that bridges edge gaps
    pub closing_radius: u8,
    /// Width in pixels of the soft edge at the mask boundary
    pub soft_edge_px: f32,
    /// Largest contour must enclose at least this fraction of the image
    pub min_area_ratio: f32,
    /// Further contours are kept when at least this fraction of the largest
    pub secondary_area_ratio: f32,
}

impl Default for ContourConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 30.0,
            canny_high: 90.0,
            closing_radius: 3,
            soft_edge_px: 3.0,
            min_area_ratio: 0.01,
            secondary_area_ratio: 0.25,
        }
    }
}

/// Largest averaged patch radius accepted for corner sampling
pub const MAX_PATCH_RADIUS: u32 = 64;

/// Corner color-distance heuristic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CornerColorConfig {
    /// RGB distance at or below which a pixel is background
    pub threshold: f32,
    /// Width of the linear ramp between background and foreground
    pub ramp_width: f32,
    /// Also sample the four edge midpoints
    pub sample_edge_midpoints: bool,
    /// Radius of the averaged patch around each sample point
    pub patch_radius: u32,
    /// Morphological close/open on the mask to remove speckles
    pub clean_mask: bool,
}

impl Default for CornerColorConfig {
    fn default() -> Self {
        Self {
            threshold: 50.0,
            ramp_width: 20.0,
            sample_edge_midpoints: false,
            patch_radius: 2,
            clean_mask: true,
        }
    }
}

/// Complete configuration for a processing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: ExtractionMode,
    pub size_guard: SizeGuardConfig,
    pub model: ModelConfig,
    pub contour: ContourConfig,
    pub corner_color: CornerColorConfig,
    /// JPEG quality for solid color outputs (1-100)
    pub jpeg_quality: u8,
    /// Include per-method detail in failure messages
    pub debug: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Auto,
            size_guard: SizeGuardConfig::default(),
            model: ModelConfig::default(),
            contour: ContourConfig::default(),
            corner_color: CornerColorConfig::default(),
            jpeg_quality: 95,
            debug: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// - File cannot be read
    /// - JSON is malformed or fails validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BgSwapError::file_io_error("read config", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            BgSwapError::configuration(format!(
                "Failed to parse config '{}': {e}",
                path.display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    /// - Quality or threshold values outside their valid ranges
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(BgSwapError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(95),
            ));
        }

        let guard = &self.size_guard;
        if guard.min_dimension == 0 {
            return Err(BgSwapError::config_value_error(
                "minimum dimension",
                guard.min_dimension,
                ">= 1",
                Some(50),
            ));
        }
        if guard.large_image_threshold < guard.min_dimension {
            return Err(BgSwapError::configuration(format!(
                "Large image threshold {} is below the minimum dimension {}",
                guard.large_image_threshold, guard.min_dimension
            )));
        }
        if guard.max_upload_bytes == 0 {
            return Err(BgSwapError::config_value_error(
                "upload byte limit",
                guard.max_upload_bytes,
                ">= 1",
                Some(25 * 1024 * 1024),
            ));
        }

        let contour = &self.contour;
        if !(contour.canny_low >= 0.0 && contour.canny_low <= contour.canny_high) {
            return Err(BgSwapError::configuration(format!(
                "Canny thresholds must satisfy 0 <= low <= high (got {} / {})",
                contour.canny_low, contour.canny_high
            )));
        }
        if !(contour.blur_sigma > 0.0) {
            return Err(BgSwapError::config_value_error(
                "blur sigma",
                contour.blur_sigma,
                "> 0",
                Some(1.1),
            ));
        }
        if !(contour.soft_edge_px >= 0.0) {
            return Err(BgSwapError::config_value_error(
                "soft edge width",
                contour.soft_edge_px,
                ">= 0",
                Some(3.0),
            ));
        }
        for (name, ratio) in [
            ("minimum contour area ratio", contour.min_area_ratio),
            ("secondary contour area ratio", contour.secondary_area_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(BgSwapError::config_value_error(name, ratio, "0.0-1.0", None));
            }
        }

        let corner = &self.corner_color;
        if !(corner.threshold >= 0.0 && corner.threshold <= 442.0) {
            return Err(BgSwapError::config_value_error(
                "color distance threshold",
                corner.threshold,
                "0-442",
                Some(50.0),
            ));
        }
        if !(corner.ramp_width >= 0.0) {
            return Err(BgSwapError::config_value_error(
                "color ramp width",
                corner.ramp_width,
                ">= 0",
                Some(20.0),
            ));
        }
        if corner.patch_radius > MAX_PATCH_RADIUS {
            return Err(BgSwapError::config_value_error(
                "corner patch radius",
                corner.patch_radius,
                "0-64",
                Some(2),
            ));
        }

        if self.model.timeout_ms == Some(0) {
            return Err(BgSwapError::configuration(
                "Model timeout must be positive; omit it to disable the timeout",
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration
    #[must_use]
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn mode(mut self, mode: ExtractionMode) -> Self {
        self.config.mode = mode;
        self
    }

    #[must_use]
    pub fn size_guard(mut self, size_guard: SizeGuardConfig) -> Self {
        self.config.size_guard = size_guard;
        self
    }

    #[must_use]
    pub fn large_image_threshold(mut self, threshold: u32) -> Self {
        self.config.size_guard.large_image_threshold = threshold;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.size_guard.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.model.backend = backend;
        self
    }

    #[must_use]
    pub fn model_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.config.model.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.model.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn contour(mut self, contour: ContourConfig) -> Self {
        self.config.contour = contour;
        self
    }

    #[must_use]
    pub fn soft_edge_px(mut self, px: f32) -> Self {
        self.config.contour.soft_edge_px = px;
        self
    }

    #[must_use]
    pub fn corner_color(mut self, corner_color: CornerColorConfig) -> Self {
        self.config.corner_color = corner_color;
        self
    }

    #[must_use]
    pub fn color_threshold(mut self, threshold: f32) -> Self {
        self.config.corner_color.threshold = threshold;
        self
    }

    #[must_use]
    pub fn color_ramp_width(mut self, ramp_width: f32) -> Self {
        self.config.corner_color.ramp_width = ramp_width;
        self
    }

    #[must_use]
    pub fn sample_edge_midpoints(mut self, sample: bool) -> Self {
        self.config.corner_color.sample_edge_midpoints = sample;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any value outside its valid range
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelSource;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.mode, ExtractionMode::Auto);
        assert_eq!(config.jpeg_quality, 95);
        assert_eq!(config.size_guard.min_dimension, 50);
        assert_eq!(config.size_guard.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.size_guard.large_image_threshold, 2000);
        assert!(!config.debug);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::builder()
            .mode(ExtractionMode::Forced(MethodKind::Contour))
            .jpeg_quality(80)
            .color_threshold(35.0)
            .debug(true)
            .build()
            .unwrap();

        assert_eq!(config.mode, ExtractionMode::Forced(MethodKind::Contour));
        assert_eq!(config.jpeg_quality, 80);
        assert!((config.corner_color.threshold - 35.0).abs() < f32::EPSILON);
        assert!(config.debug);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.jpeg_quality = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.contour.canny_low = 100.0;
        config.contour.canny_high = 50.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.size_guard.large_image_threshold = 10;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.model.timeout_ms = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_radius_is_bounded() {
        let mut config = PipelineConfig::default();
        config.corner_color.patch_radius = MAX_PATCH_RADIUS;
        assert!(config.validate().is_ok());

        config.corner_color.patch_radius = u32::MAX;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BgSwapError::Configuration(_)), "{err}");
        assert!(err.to_string().contains("patch radius"));

        let file = tempfile::NamedTempFile::new().unwrap();
        let json = format!(r#"{{"corner_color": {{"patch_radius": {}}}}}"#, u32::MAX);
        std::fs::write(file.path(), json).unwrap();
        assert!(PipelineConfig::from_json_file(file.path()).is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto".parse::<ExtractionMode>().unwrap(), ExtractionMode::Auto);
        assert_eq!(
            "Model".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::Forced(MethodKind::Model)
        );
        assert_eq!(
            "corner-color".parse::<ExtractionMode>().unwrap(),
            ExtractionMode::Forced(MethodKind::CornerColor)
        );
        assert!("magic".parse::<ExtractionMode>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = PipelineConfig::builder()
            .mode(ExtractionMode::Forced(MethodKind::CornerColor))
            .model_spec(ModelSpec {
                source: ModelSource::External("/models/u2net".into()),
                variant: None,
            })
            .build()
            .unwrap();

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"corner-color\""));
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: PipelineConfig =
            serde_json::from_str(r#"{"mode": "contour", "corner_color": {"threshold": 42.0}}"#)
                .unwrap();
        assert_eq!(parsed.mode, ExtractionMode::Forced(MethodKind::Contour));
        assert!((parsed.corner_color.threshold - 42.0).abs() < f32::EPSILON);
        assert!((parsed.corner_color.ramp_width - 20.0).abs() < f32::EPSILON);
        assert_eq!(parsed.jpeg_quality, 95);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"jpeg_quality": 90, "debug": true}"#).unwrap();

        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.jpeg_quality, 90);
        assert!(config.debug);

        std::fs::write(&path, r#"{"jpeg_quality": 200}"#).unwrap();
        assert!(PipelineConfig::from_json_file(&path).is_err());
    }

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert!("cuda".parse::<BackendType>().is_err());
    }
}
