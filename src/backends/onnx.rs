//! ONNX Runtime backend for segmentation models
//!
//! CPU execution through ONNX Runtime. Enabled with the `onnx` feature.

use crate::config::ModelConfig;
use crate::error::{BgSwapError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::{Array4, Ix4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// Segmentation backend holding one ONNX Runtime session
#[derive(Debug, Default)]
pub struct OnnxBackend {
    manager: Option<ModelManager>,
    session: Option<Session>,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend bound to a resolved model, loaded lazily on `initialize`
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            manager: Some(model_manager),
            session: None,
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.manager
            .as_ref()
            .ok_or_else(|| BgSwapError::internal("onnx backend has no model attached"))
    }

    fn thread_count(config: &ModelConfig) -> usize {
        if config.intra_threads > 0 {
            return config.intra_threads;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
    }

    fn open_session(bytes: &[u8], info: &ModelInfo, threads: usize) -> Result<Session> {
        let setup_err = |stage: &str, e: &dyn std::fmt::Display| {
            BgSwapError::model(format!("{}: {stage} failed: {e}", info.name))
        };

        Session::builder()
            .map_err(|e| setup_err("session builder", &e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| setup_err("graph optimization", &e))?
            .with_intra_threads(threads)
            .map_err(|e| setup_err("thread setup", &e))?
            .commit_from_memory(bytes)
            .map_err(|e| setup_err("session commit", &e))
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self, config: &ModelConfig) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }

        let started = Instant::now();
        let manager = self.manager()?;
        let info = manager.get_info()?;
        let bytes = manager.load_model()?;
        let threads = Self::thread_count(config);

        log::info!("🧠 Loading {} with ONNX Runtime ({threads} threads)", info.name);
        let session = Self::open_session(&bytes, &info, threads)?;
        self.session = Some(session);

        let elapsed = started.elapsed();
        log::info!("✅ Segmentation model ready after {}ms", elapsed.as_millis());
        Ok(Some(elapsed))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgSwapError::inference("onnx session used before initialize"))?;

        let started = Instant::now();
        let tensor = Value::from_array(input.clone())
            .map_err(|e| BgSwapError::inference(format!("input tensor rejected: {e}")))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| BgSwapError::inference(format!("onnx run failed: {e}")))?;

        // The fused saliency map is the first declared output
        let Some(first) = outputs.keys().next().map(ToString::to_string) else {
            return Err(BgSwapError::inference("segmentation model produced no outputs"));
        };
        let fused = outputs
            .get(first.as_str())
            .ok_or_else(|| BgSwapError::inference(format!("output '{first}' disappeared")))?
            .try_extract_array::<f32>()
            .map_err(|e| BgSwapError::inference(format!("segmentation output is not f32: {e}")))?;

        let rank = fused.ndim();
        let mask = fused
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| {
                BgSwapError::inference(format!("segmentation output has rank {rank}, expected 4"))
            })?
            .to_owned();

        log::debug!(
            "🔮 Mask {:?} from input {:?} in {}ms",
            mask.dim(),
            input.dim(),
            started.elapsed().as_millis()
        );
        Ok(mask)
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.manager
            .as_ref()
            .and_then(|manager| manager.get_info().ok())
            .map_or((1, 3, 320, 320), |info| info.input_shape)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.manager
            .as_ref()
            .and_then(|manager| manager.get_info().ok())
            .map_or((1, 1, 320, 320), |info| info.output_shape)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.manager()?.get_preprocessing_config())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}
