//! Core types flowing through a processing job

use crate::error::{BgSwapError, ExtractionError, Result};
use crate::extraction::MethodKind;
use chrono::{DateTime, Utc};
use image::{ColorType, DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Decoded input image plus the facts the boundary declared about it
#[derive(Debug, Clone)]
pub struct SourceImage {
    image: DynamicImage,
    byte_size: u64,
    mime_type: Option<String>,
}

impl SourceImage {
    /// Wrap an already decoded raster
    #[must_use]
    pub fn new(image: DynamicImage, byte_size: u64, mime_type: Option<String>) -> Self {
        Self {
            image,
            byte_size,
            mime_type,
        }
    }

    /// Decode encoded bytes, recording their size and sniffed MIME type
    ///
    /// # Errors
    /// - Bytes are not a decodable image
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes).ok();
        let image = image::load_from_memory(bytes)?;
        Ok(Self {
            image,
            byte_size: bytes.len() as u64,
            mime_type: format.map(|f| f.to_mime_type().to_string()),
        })
    }

    #[must_use]
    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn pixel_format(&self) -> ColorType {
        self.image.color()
    }

    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }
}

/// Image after the size guard, possibly downscaled
#[derive(Debug, Clone)]
pub struct OptimizedImage {
    pub image: DynamicImage,
    pub original_dimensions: (u32, u32),
    pub downscaled: bool,
    /// Ratio of new to original long edge, 1.0 when untouched
    pub scale_factor: f32,
    /// Set when downscaling was needed but failed and the original passed through
    pub optimization_error: Option<String>,
}

impl OptimizedImage {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Foreground raster produced by one extraction method
///
/// The alpha channel is the foreground confidence; dimensions equal the
/// extraction input.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub image: RgbaImage,
    pub method: MethodKind,
    /// Optional quality hint in 0.0-1.0
    pub confidence: Option<f32>,
}

impl ExtractionResult {
    #[must_use]
    pub fn new(image: RgbaImage, method: MethodKind) -> Self {
        Self {
            image,
            method,
            confidence: None,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Fraction of pixels with any foreground weight
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        let (width, height) = self.image.dimensions();
        let total = width as usize * height as usize;
        if total == 0 {
            return 0.0;
        }
        let foreground = self.image.pixels().filter(|p| p[3] > 0).count();
        foreground as f32 / total as f32
    }
}

/// Named background colors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetColor {
    White,
    Black,
    Gray,
}

impl PresetColor {
    #[must_use]
    pub fn rgb(self) -> [u8; 3] {
        match self {
            Self::White => [255, 255, 255],
            Self::Black => [0, 0, 0],
            Self::Gray => [128, 128, 128],
        }
    }

    #[must_use]
    pub fn all() -> &'static [PresetColor] {
        &[Self::White, Self::Black, Self::Gray]
    }

    fn lookup(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "white" => Some(Self::White),
            "black" => Some(Self::Black),
            "gray" | "grey" => Some(Self::Gray),
            _ => None,
        }
    }
}

impl FromStr for PresetColor {
    type Err = BgSwapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::lookup(s).ok_or_else(|| {
            BgSwapError::validation(format!(
                "Unknown preset color '{s}'. Expected one of: white, black, gray"
            ))
        })
    }
}

impl std::fmt::Display for PresetColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
            Self::Gray => write!(f, "gray"),
        }
    }
}

/// RGB color parsed from exactly six hex digits, optionally `#`-prefixed
///
/// Only [`HexColor::parse`] constructs this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexColor {
    red: u8,
    green: u8,
    blue: u8,
}

impl HexColor {
    /// Parse a custom color string
    ///
    /// # Errors
    /// - Anything other than six hex digits with an optional leading `#`
    pub fn parse(input: &str) -> Result<Self> {
        let digits = input.strip_prefix('#').unwrap_or(input);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BgSwapError::validation(format!(
                "Invalid color '{input}': expected 6 hex digits like 'FF00AA' or '#00ff00'"
            )));
        }

        let channel = |range: std::ops::Range<usize>| {
            digits
                .get(range)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| BgSwapError::validation(format!("Invalid color '{input}'")))
        };

        Ok(Self {
            red: channel(0..2)?,
            green: channel(2..4)?,
            blue: channel(4..6)?,
        })
    }

    #[must_use]
    pub fn rgb(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

impl std::fmt::Display for HexColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

impl Serialize for HexColor {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for HexColor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Requested background for one output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BackgroundSpec {
    Transparent,
    PresetColor(PresetColor),
    CustomColor(HexColor),
}

impl BackgroundSpec {
    /// Solid fill color, `None` for transparent
    #[must_use]
    pub fn fill_rgb(&self) -> Option<[u8; 3]> {
        match self {
            Self::Transparent => None,
            Self::PresetColor(preset) => Some(preset.rgb()),
            Self::CustomColor(color) => Some(color.rgb()),
        }
    }

    #[must_use]
    pub fn is_transparent(&self) -> bool {
        matches!(self, Self::Transparent)
    }

    /// Short filesystem-safe label, e.g. for output file names
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Transparent => "transparent".to_string(),
            Self::PresetColor(preset) => preset.to_string(),
            Self::CustomColor(color) => color.to_string().trim_start_matches('#').to_string(),
        }
    }

    /// Parse a list of background strings, failing on the first invalid one
    ///
    /// # Errors
    /// - Any entry is neither `transparent`, a preset name nor a valid hex color
    pub fn parse_all<S: AsRef<str>>(values: &[S]) -> Result<Vec<Self>> {
        values.iter().map(|v| v.as_ref().parse()).collect()
    }
}

impl FromStr for BackgroundSpec {
    type Err = BgSwapError;

    /// `transparent`/`none`, a preset name, or a custom hex color
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("transparent") || trimmed.eq_ignore_ascii_case("none") {
            return Ok(Self::Transparent);
        }
        if let Some(preset) = PresetColor::lookup(trimmed) {
            return Ok(Self::PresetColor(preset));
        }
        HexColor::parse(trimmed).map(Self::CustomColor)
    }
}

impl std::fmt::Display for BackgroundSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transparent => write!(f, "transparent"),
            Self::PresetColor(preset) => write!(f, "{preset}"),
            Self::CustomColor(color) => write!(f, "{color}"),
        }
    }
}

/// Encoding chosen for an output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    /// Lossless with alpha
    Png,
    /// Lossy and opaque
    Jpeg,
}

impl OutputEncoding {
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    #[must_use]
    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Png)
    }
}

/// One encoded artifact
#[derive(Debug, Clone)]
pub struct CompositedOutput {
    pub background: BackgroundSpec,
    pub encoding: OutputEncoding,
    /// Final raster: RGBA for transparent outputs, RGB otherwise
    pub raster: DynamicImage,
    pub bytes: Vec<u8>,
}

impl CompositedOutput {
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn mime_type(&self) -> &'static str {
        self.encoding.mime_type()
    }

    /// Suggested file name for this artifact
    #[must_use]
    pub fn file_name(&self, stem: &str) -> String {
        format!(
            "{}_{}.{}",
            stem,
            self.background.label(),
            self.encoding.extension()
        )
    }
}

/// Job lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Received,
    Optimizing,
    Extracting,
    Compositing,
    Completed,
    Failed,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (Self::Received, Self::Optimizing)
            | (Self::Optimizing, Self::Extracting)
            | (Self::Extracting, Self::Compositing)
            | (Self::Compositing, Self::Completed) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Result of one method in the fallback chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { error: ExtractionError },
}

/// Record of one extraction attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodAttempt {
    pub method: MethodKind,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

impl MethodAttempt {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Succeeded)
    }

    #[must_use]
    pub fn error(&self) -> Option<&ExtractionError> {
        match &self.outcome {
            AttemptOutcome::Succeeded => None,
            AttemptOutcome::Failed { error } => Some(error),
        }
    }
}

/// Stage timing breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    /// Size guard validation and downscaling
    pub optimize_ms: u64,
    /// Whole fallback chain
    pub extraction_ms: u64,
    /// Blending and encoding of all outputs
    pub compositing_ms: u64,
    pub total_ms: u64,
}

/// Audit trail of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub states: Vec<JobState>,
    pub attempts: Vec<MethodAttempt>,
    pub original_dimensions: (u32, u32),
    pub processed_dimensions: (u32, u32),
    pub downscaled: bool,
    pub scale_factor: f32,
    pub optimization_error: Option<String>,
    pub timings: ProcessingTimings,
    pub completed_at: DateTime<Utc>,
}

impl ProcessingReport {
    /// Methods in the order they were tried
    #[must_use]
    pub fn attempted_methods(&self) -> Vec<MethodKind> {
        self.attempts.iter().map(|a| a.method).collect()
    }

    #[must_use]
    pub fn final_state(&self) -> Option<JobState> {
        self.states.last().copied()
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    /// - Serialization failure
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BgSwapError::internal(format!("Failed to serialize report: {e}")))
    }
}

/// Structured description of a failed job
#[derive(Debug, Clone)]
pub struct ProcessingFailure {
    /// Last-resort cause, with per-method detail only in debug mode
    pub reason: String,
    /// State in which the job failed
    pub failed_in: JobState,
    pub attempted: Vec<MethodKind>,
    pub errors: Vec<ExtractionError>,
    pub report: ProcessingReport,
}

impl std::fmt::Display for ProcessingFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// Final outcome of a job
#[derive(Debug, Clone)]
pub enum ProcessingOutcome {
    /// One output per requested background, in request order
    Success {
        outputs: Vec<CompositedOutput>,
        method: MethodKind,
        report: ProcessingReport,
    },
    Failure(ProcessingFailure),
}

impl ProcessingOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn report(&self) -> &ProcessingReport {
        match self {
            Self::Success { report, .. } => report,
            Self::Failure(failure) => &failure.report,
        }
    }

    #[must_use]
    pub fn outputs(&self) -> &[CompositedOutput] {
        match self {
            Self::Success { outputs, .. } => outputs,
            Self::Failure(_) => &[],
        }
    }

    /// Convert a failure into an error, keeping outputs on success
    ///
    /// # Errors
    /// - `Encoding` when the job failed while compositing
    /// - `ExtractionExhausted` when every method failed
    pub fn into_result(self) -> Result<Vec<CompositedOutput>> {
        match self {
            Self::Success { outputs, .. } => Ok(outputs),
            Self::Failure(failure) if failure.failed_in == JobState::Compositing => {
                Err(BgSwapError::encoding(failure.reason))
            },
            Self::Failure(failure) => Err(BgSwapError::ExtractionExhausted {
                summary: failure.reason,
                errors: failure.errors,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_color_accepts_valid_strings() {
        assert_eq!(HexColor::parse("FF00AA").unwrap().rgb(), [255, 0, 170]);
        assert_eq!(HexColor::parse("#00ff00").unwrap().rgb(), [0, 255, 0]);
        assert_eq!(HexColor::parse("#00ff00").unwrap().to_string(), "#00ff00");
    }

    #[test]
    fn test_hex_color_rejects_malformed_strings() {
        for bad in ["red", "#ABC", "12345G", "", "#", "##00ff00", "00ff001", " 00ff00", "#00ff0"] {
            assert!(
                matches!(HexColor::parse(bad), Err(BgSwapError::Validation(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_background_spec_parsing() {
        assert_eq!("transparent".parse::<BackgroundSpec>().unwrap(), BackgroundSpec::Transparent);
        assert_eq!(
            "White".parse::<BackgroundSpec>().unwrap(),
            BackgroundSpec::PresetColor(PresetColor::White)
        );
        assert_eq!(
            "grey".parse::<BackgroundSpec>().unwrap(),
            BackgroundSpec::PresetColor(PresetColor::Gray)
        );
        let custom = "#112233".parse::<BackgroundSpec>().unwrap();
        assert_eq!(custom.fill_rgb(), Some([0x11, 0x22, 0x33]));
        assert_eq!(custom.label(), "112233");
        assert!("red".parse::<BackgroundSpec>().is_err());
    }

    #[test]
    fn test_parse_all_stops_on_invalid() {
        assert_eq!(BackgroundSpec::parse_all(&["white", "#000000"]).unwrap().len(), 2);
        assert!(BackgroundSpec::parse_all(&["white", "#ABC"]).is_err());
    }

    #[test]
    fn test_background_spec_serde() {
        let spec = BackgroundSpec::CustomColor(HexColor::parse("ff00aa").unwrap());
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r##"{"type":"custom_color","value":"#ff00aa"}"##);
        let parsed: BackgroundSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);

        let invalid = r##"{"type":"custom_color","value":"#ff00a"}"##;
        assert!(serde_json::from_str::<BackgroundSpec>(invalid).is_err());
    }

    #[test]
    fn test_job_state_transitions() {
        assert!(JobState::Received.can_transition_to(JobState::Optimizing));
        assert!(JobState::Extracting.can_transition_to(JobState::Failed));
        assert!(JobState::Compositing.can_transition_to(JobState::Completed));
        assert!(!JobState::Received.can_transition_to(JobState::Compositing));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_output_encoding_metadata() {
        assert_eq!(OutputEncoding::Png.mime_type(), "image/png");
        assert_eq!(OutputEncoding::Jpeg.mime_type(), "image/jpeg");
        assert!(OutputEncoding::Png.has_alpha());
        assert!(!OutputEncoding::Jpeg.has_alpha());

        let output = CompositedOutput {
            background: BackgroundSpec::PresetColor(PresetColor::Black),
            encoding: OutputEncoding::Jpeg,
            raster: DynamicImage::ImageRgb8(image::RgbImage::new(10, 10)),
            bytes: vec![1, 2, 3],
        };
        assert_eq!(output.file_name("photo"), "photo_black.jpg");
        assert_eq!(output.byte_size(), 3);
    }

    #[test]
    fn test_extraction_result_foreground_ratio() {
        let mut image = RgbaImage::new(4, 1);
        image.put_pixel(0, 0, image::Rgba([1, 2, 3, 255]));
        image.put_pixel(1, 0, image::Rgba([1, 2, 3, 10]));
        let result = ExtractionResult::new(image, MethodKind::CornerColor).with_confidence(2.0);
        assert!((result.foreground_ratio() - 0.5).abs() < f32::EPSILON);
        assert_eq!(result.confidence, Some(1.0));
    }
}
