//! Segmentation model resolution
//!
//! A model is an ONNX file plus an optional `model.json` sidecar describing
//! its preprocessing. Models are referenced either by filesystem path or by an
//! id inside the user cache directory (`<cache>/imgly-bgswap/models/<id>/`).

use crate::error::{BgSwapError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the sidecar configuration inside a model directory
pub const MODEL_CONFIG_FILE: &str = "model.json";

/// Default model file name inside a model directory
pub const DEFAULT_MODEL_FILE: &str = "model.onnx";

/// Model source specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Model file or model directory on the filesystem
    External(PathBuf),
    /// Model directory in the cache, by id
    Cached(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Cached(model_id) => format!("cached:{}", model_id),
        }
    }
}

/// Model source plus optional variant
///
/// The variant selects `<variant>.onnx` inside a model directory instead of
/// `model.onnx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Cached("u2net".to_string()),
            variant: None,
        }
    }
}

impl ModelSpec {
    /// Parse a CLI-style model argument: an existing path or a cache id
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let path = Path::new(value);
        let source = if path.exists() || value.contains(std::path::MAIN_SEPARATOR) {
            ModelSource::External(path.to_path_buf())
        } else {
            ModelSource::Cached(value.to_string())
        };
        Self {
            source,
            variant: None,
        }
    }
}

/// Preprocessing parameters for a segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Square input size `[width, height]`
    pub target_size: [u32; 2],
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// u2net input conventions
    fn default() -> Self {
        Self {
            target_size: [320, 320],
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

#[derive(Debug, Deserialize)]
struct SidecarNormalization {
    mean: [f32; 3],
    std: [f32; 3],
}

#[derive(Debug, Deserialize)]
struct SidecarPreprocessing {
    target_size: [u32; 2],
    normalization: SidecarNormalization,
}

#[derive(Debug, Deserialize)]
struct ModelSidecar {
    name: Option<String>,
    preprocessing: Option<SidecarPreprocessing>,
}

/// Directory holding cached models
///
/// # Errors
/// - The platform has no cache directory
pub fn models_cache_dir() -> Result<PathBuf> {
    dirs::cache_dir()
        .map(|dir| dir.join("imgly-bgswap").join("models"))
        .ok_or_else(|| BgSwapError::model("No cache directory available on this platform"))
}

/// Resolved model files and metadata
#[derive(Debug, Clone)]
pub struct ModelManager {
    model_path: PathBuf,
    name: String,
    preprocessing: PreprocessingConfig,
}

impl ModelManager {
    /// Resolve a model specification to files on disk
    ///
    /// # Errors
    /// - Model file does not exist
    /// - Sidecar `model.json` exists but is malformed
    pub fn from_spec(spec: &ModelSpec) -> Result<Self> {
        let model_path = Self::locate_model_file(spec)?;
        let sidecar_path = model_path
            .parent()
            .map(|dir| dir.join(MODEL_CONFIG_FILE))
            .filter(|path| path.is_file());

        let sidecar = match sidecar_path {
            Some(path) => Some(Self::read_sidecar(&path)?),
            None => None,
        };

        let name = sidecar
            .as_ref()
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| match &spec.source {
                ModelSource::Cached(id) => id.clone(),
                ModelSource::External(_) => model_path
                    .file_stem()
                    .map_or_else(|| "model".to_string(), |s| s.to_string_lossy().into_owned()),
            });

        let preprocessing = sidecar
            .and_then(|s| s.preprocessing)
            .map_or_else(PreprocessingConfig::default, |p| PreprocessingConfig {
                target_size: p.target_size,
                normalization_mean: p.normalization.mean,
                normalization_std: p.normalization.std,
            });

        if preprocessing.target_size[0] == 0 || preprocessing.target_size[0] != preprocessing.target_size[1] {
            return Err(BgSwapError::model_error_with_context(
                "configure",
                &model_path,
                &format!(
                    "target size {:?} must be square and non-zero",
                    preprocessing.target_size
                ),
                &["check model.json preprocessing.target_size"],
            ));
        }
        if preprocessing.normalization_std.iter().any(|s| *s <= 0.0) {
            return Err(BgSwapError::model_error_with_context(
                "configure",
                &model_path,
                "normalization std values must be positive",
                &["check model.json preprocessing.normalization.std"],
            ));
        }

        Ok(Self {
            model_path,
            name,
            preprocessing,
        })
    }

    /// Cheap existence check used for capability probing
    #[must_use]
    pub fn is_resolvable(spec: &ModelSpec) -> bool {
        Self::locate_model_file(spec).is_ok()
    }

    fn locate_model_file(spec: &ModelSpec) -> Result<PathBuf> {
        let base = match &spec.source {
            ModelSource::External(path) => path.clone(),
            ModelSource::Cached(id) => models_cache_dir()?.join(id),
        };

        let candidate = if base.is_dir() {
            let file_name = spec
                .variant
                .as_ref()
                .map_or_else(|| DEFAULT_MODEL_FILE.to_string(), |v| format!("{v}.onnx"));
            base.join(file_name)
        } else {
            base
        };

        if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(BgSwapError::model(format!(
                "Model file not found: {} ({})",
                candidate.display(),
                spec.source.display_name()
            )))
        }
    }

    fn read_sidecar(path: &Path) -> Result<ModelSidecar> {
        let content = fs::read_to_string(path)
            .map_err(|e| BgSwapError::file_io_error("read", path, &e))?;
        serde_json::from_str(&content).map_err(|e| {
            BgSwapError::model_error_with_context(
                "parse configuration for",
                path,
                &e.to_string(),
                &["expected {\"name\", \"preprocessing\": {\"target_size\", \"normalization\"}}"],
            )
        })
    }

    /// Load model data
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_path)
            .map_err(|e| BgSwapError::file_io_error("read model", &self.model_path, &e))
    }

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata cannot be read
    pub fn get_info(&self) -> Result<ModelInfo> {
        let size_bytes = fs::metadata(&self.model_path)
            .map_err(|e| BgSwapError::file_io_error("inspect model", &self.model_path, &e))?
            .len() as usize;
        let side = self.preprocessing.target_size[0] as usize;
        Ok(ModelInfo {
            name: self.name.clone(),
            size_bytes,
            input_shape: (1, 3, side, side),
            output_shape: (1, 1, side, side),
        })
    }

    #[must_use]
    pub fn get_preprocessing_config(&self) -> PreprocessingConfig {
        self.preprocessing.clone()
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fake_model(dir: &Path, file: &str) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, b"not really onnx").unwrap();
        path
    }

    #[test]
    fn test_display_name() {
        let external = ModelSource::External(PathBuf::from("/models/u2net.onnx"));
        assert_eq!(external.display_name(), "external:u2net.onnx");
        let cached = ModelSource::Cached("u2netp".to_string());
        assert_eq!(cached.display_name(), "cached:u2netp");
    }

    #[test]
    fn test_missing_model_is_not_resolvable() {
        let spec = ModelSpec {
            source: ModelSource::External(PathBuf::from("/definitely/not/here.onnx")),
            variant: None,
        };
        assert!(!ModelManager::is_resolvable(&spec));
        assert!(ModelManager::from_spec(&spec).is_err());
    }

    #[test]
    fn test_directory_without_sidecar_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write_fake_model(dir.path(), DEFAULT_MODEL_FILE);

        let spec = ModelSpec {
            source: ModelSource::External(dir.path().to_path_buf()),
            variant: None,
        };
        let manager = ModelManager::from_spec(&spec).unwrap();
        assert_eq!(manager.get_preprocessing_config(), PreprocessingConfig::default());
        let info = manager.get_info().unwrap();
        assert_eq!(info.input_shape, (1, 3, 320, 320));
        assert_eq!(info.size_bytes, 15);
    }

    #[test]
    fn test_sidecar_and_variant() {
        let dir = tempfile::tempdir().unwrap();
        write_fake_model(dir.path(), "fp16.onnx");
        fs::write(
            dir.path().join(MODEL_CONFIG_FILE),
            r#"{"name": "isnet", "preprocessing": {"target_size": [1024, 1024],
                "normalization": {"mean": [0.5, 0.5, 0.5], "std": [1.0, 1.0, 1.0]}}}"#,
        )
        .unwrap();

        let spec = ModelSpec {
            source: ModelSource::External(dir.path().to_path_buf()),
            variant: Some("fp16".to_string()),
        };
        let manager = ModelManager::from_spec(&spec).unwrap();
        let info = manager.get_info().unwrap();
        assert_eq!(info.name, "isnet");
        assert_eq!(info.output_shape, (1, 1, 1024, 1024));
        assert_eq!(manager.get_preprocessing_config().normalization_mean, [0.5; 3]);
    }

    #[test]
    fn test_malformed_sidecar_is_error() {
        let dir = tempfile::tempdir().unwrap();
        write_fake_model(dir.path(), DEFAULT_MODEL_FILE);
        fs::write(dir.path().join(MODEL_CONFIG_FILE), "{ nope").unwrap();

        let spec = ModelSpec {
            source: ModelSource::External(dir.path().to_path_buf()),
            variant: None,
        };
        assert!(matches!(
            ModelManager::from_spec(&spec),
            Err(BgSwapError::Model(_))
        ));
    }

    #[test]
    fn test_parse_model_argument() {
        let spec = ModelSpec::parse("u2netp");
        assert_eq!(spec.source, ModelSource::Cached("u2netp".to_string()));

        let dir = tempfile::tempdir().unwrap();
        let path = write_fake_model(dir.path(), "custom.onnx");
        let spec = ModelSpec::parse(path.to_str().unwrap());
        assert_eq!(spec.source, ModelSource::External(path));
    }
}
