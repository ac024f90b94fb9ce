//! Foreground extraction methods
//!
//! Every method turns a raster into an RGBA [`ExtractionResult`] whose alpha
//! channel is the foreground mask. Methods are interchangeable; the
//! [`MethodSelector`](crate::selector::MethodSelector) decides which ones run
//! and in what order.
//!
//! - [`ModelExtractor`]: pretrained segmentation model through an inference backend
//! - [`ContourExtractor`]: edge detection and largest closed contour fill
//! - [`CornerColorExtractor`]: color distance from sampled border patches

pub mod contour;
pub mod corner_color;
pub mod model;

pub use contour::ContourExtractor;
pub use corner_color::CornerColorExtractor;
pub use model::ModelExtractor;

use crate::{
    config::PipelineConfig,
    error::{BgSwapError, ExtractionError},
    inference::{BackendFactory, DefaultBackendFactory},
    types::ExtractionResult,
};
use image::{DynamicImage, RgbaImage};
use instant::Duration;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr, sync::Arc};

/// Identifier of an extraction method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MethodKind {
    /// Pretrained segmentation model
    Model,
    /// Edge and contour heuristic
    Contour,
    /// Border color distance heuristic
    CornerColor,
}

impl MethodKind {
    /// All methods, highest priority first
    #[must_use]
    pub fn priority_order() -> [MethodKind; 3] {
        [Self::Model, Self::Contour, Self::CornerColor]
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Contour => "contour",
            Self::CornerColor => "corner-color",
        }
    }
}

impl std::fmt::Display for MethodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodKind {
    type Err = BgSwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "model" | "u2net" | "rembg" => Ok(Self::Model),
            "contour" | "edges" | "opencv" => Ok(Self::Contour),
            "corner-color" | "corner_color" | "color" | "pillow" => Ok(Self::CornerColor),
            other => Err(BgSwapError::configuration(format!(
                "Unknown extraction method '{other}'. Expected one of: model, contour, corner-color"
            ))),
        }
    }
}

/// Common contract of all extraction strategies
pub trait ExtractionMethod: Send + Sync {
    /// Which method this is
    fn kind(&self) -> MethodKind;

    /// Cheap capability check, run once per pipeline construction
    fn probe(&self) -> bool;

    /// Compute the foreground of `image`
    ///
    /// # Errors
    /// - Any method-specific failure, reported as a recoverable [`ExtractionError`]
    fn extract(&self, image: &DynamicImage) -> Result<ExtractionResult, ExtractionError>;

    /// Upper bound on a single `extract` call, if any
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Attach a mask to the source colors
pub(crate) fn apply_alpha(image: &DynamicImage, mask: &image::GrayImage) -> RgbaImage {
    let mut rgba = image.to_rgba8();
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel[3] = alpha[0];
    }
    rgba
}

/// Extraction methods available to a pipeline, keyed by kind
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<MethodKind, Arc<dyn ExtractionMethod>>,
}

impl MethodRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the three built-in methods, using the compiled-in backends
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::from_config_with_factory(config, Arc::new(DefaultBackendFactory))
    }

    /// Registry with the three built-in methods and a custom backend factory
    #[must_use]
    pub fn from_config_with_factory(
        config: &PipelineConfig,
        backend_factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self::new()
            .with_method(Arc::new(ModelExtractor::new(
                config.model.clone(),
                backend_factory,
            )))
            .with_method(Arc::new(ContourExtractor::new(config.contour.clone())))
            .with_method(Arc::new(CornerColorExtractor::new(
                config.corner_color.clone(),
            )))
    }

    /// Register or replace the method for its kind
    #[must_use]
    pub fn with_method(mut self, method: Arc<dyn ExtractionMethod>) -> Self {
        self.methods.insert(method.kind(), method);
        self
    }

    #[must_use]
    pub fn get(&self, kind: MethodKind) -> Option<&Arc<dyn ExtractionMethod>> {
        self.methods.get(&kind)
    }

    /// Registered kinds in priority order
    #[must_use]
    pub fn kinds(&self) -> Vec<MethodKind> {
        MethodKind::priority_order()
            .into_iter()
            .filter(|kind| self.methods.contains_key(kind))
            .collect()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_kind_names_and_aliases() {
        assert_eq!("model".parse::<MethodKind>().unwrap(), MethodKind::Model);
        assert_eq!("U2NET".parse::<MethodKind>().unwrap(), MethodKind::Model);
        assert_eq!("opencv".parse::<MethodKind>().unwrap(), MethodKind::Contour);
        assert_eq!("pillow".parse::<MethodKind>().unwrap(), MethodKind::CornerColor);
        assert_eq!(
            "corner_color".parse::<MethodKind>().unwrap(),
            MethodKind::CornerColor
        );
        assert!(matches!(
            "magic".parse::<MethodKind>(),
            Err(BgSwapError::Configuration(_))
        ));

        for kind in MethodKind::priority_order() {
            assert_eq!(kind.to_string().parse::<MethodKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_method_kind_serde_uses_kebab_case() {
        let json = serde_json::to_string(&MethodKind::CornerColor).unwrap();
        assert_eq!(json, "\"corner-color\"");
        let parsed: MethodKind = serde_json::from_str("\"contour\"").unwrap();
        assert_eq!(parsed, MethodKind::Contour);
    }

    #[test]
    fn test_registry_from_config_has_all_methods() {
        let registry = MethodRegistry::from_config(&PipelineConfig::default());
        assert_eq!(registry.kinds(), MethodKind::priority_order().to_vec());
        assert!(registry.get(MethodKind::CornerColor).unwrap().probe());
    }

    #[test]
    fn test_registry_with_method_replaces_kind() {
        let replacement = Arc::new(CornerColorExtractor::default());
        let registry = MethodRegistry::new().with_method(replacement);
        assert_eq!(registry.kinds(), vec![MethodKind::CornerColor]);
        assert!(registry.get(MethodKind::Model).is_none());
    }
}
