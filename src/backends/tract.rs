//! Tract backend for segmentation models
//!
//! Pure Rust ONNX inference with no external runtime. This is the default
//! backend behind the model-based extraction method.

use crate::config::ModelConfig;
use crate::error::{BgSwapError, Result};
use crate::inference::InferenceBackend;
use crate::models::{ModelInfo, ModelManager, PreprocessingConfig};
use instant::{Duration, Instant};
use ndarray::{Array4, ArrayViewD, Ix4};
use tract_onnx::prelude::*;

type SegmentationPlan =
    RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Fallback shapes reported before a model is attached
const UNRESOLVED_INPUT: (usize, usize, usize, usize) = (1, 3, 320, 320);
const UNRESOLVED_OUTPUT: (usize, usize, usize, usize) = (1, 1, 320, 320);

/// Segmentation backend running an optimized tract plan
#[derive(Debug, Default)]
pub struct TractBackend {
    manager: Option<ModelManager>,
    plan: Option<SegmentationPlan>,
}

impl TractBackend {
    /// Backend with no model attached; `initialize` will fail until one is
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend bound to a resolved model, loaded lazily on `initialize`
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            manager: Some(model_manager),
            plan: None,
        }
    }

    fn manager(&self) -> Result<&ModelManager> {
        self.manager
            .as_ref()
            .ok_or_else(|| BgSwapError::internal("tract backend has no model attached"))
    }

    /// Parse the ONNX graph, pin its input fact and optimize it
    fn build_plan(bytes: Vec<u8>, info: &ModelInfo) -> Result<SegmentationPlan> {
        let (batch, channels, height, width) = info.input_shape;
        let load_err = |stage: &str, e: TractError| {
            BgSwapError::model(format!("{}: {stage} failed: {e}", info.name))
        };

        onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .map_err(|e| load_err("graph parsing", e))?
            .with_input_fact(0, f32::fact([batch, channels, height, width]).into())
            .map_err(|e| load_err("input fact", e))?
            .into_optimized()
            .map_err(|e| load_err("optimization", e))?
            .into_runnable()
            .map_err(|e| load_err("plan creation", e))
    }

    fn shape_of(
        &self,
        pick: fn(&ModelInfo) -> (usize, usize, usize, usize),
    ) -> Option<(usize, usize, usize, usize)> {
        self.manager
            .as_ref()
            .and_then(|manager| manager.get_info().ok())
            .map(|info| pick(&info))
    }
}

/// Copy the first four-dimensional output into an owned mask tensor
fn owned_mask(view: ArrayViewD<'_, f32>) -> Result<Array4<f32>> {
    let rank = view.ndim();
    view.into_dimensionality::<Ix4>()
        .map(|mask| mask.to_owned())
        .map_err(|_| {
            BgSwapError::inference(format!("segmentation output has rank {rank}, expected 4"))
        })
}

impl InferenceBackend for TractBackend {
    fn initialize(&mut self, _config: &ModelConfig) -> Result<Option<Duration>> {
        if self.plan.is_some() {
            return Ok(None);
        }

        let started = Instant::now();
        let manager = self.manager()?;
        let info = manager.get_info()?;
        let bytes = manager.load_model()?;

        #[allow(clippy::cast_precision_loss)]
        let megabytes = info.size_bytes as f64 / (1024.0 * 1024.0);
        log::info!("🧠 Loading {} ({megabytes:.1} MB) with tract", info.name);

        let plan = Self::build_plan(bytes, &info)?;
        self.plan = Some(plan);

        let elapsed = started.elapsed();
        log::info!("✅ Segmentation model ready after {}ms", elapsed.as_millis());
        Ok(Some(elapsed))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| BgSwapError::inference("tract plan used before initialize"))?;

        let started = Instant::now();
        let mut outputs = plan
            .run(tvec![Tensor::from(input.clone()).into()])
            .map_err(|e| BgSwapError::inference(format!("tract run failed: {e}")))?;

        // u2net-style graphs emit side outputs after the fused map
        if outputs.is_empty() {
            return Err(BgSwapError::inference("segmentation model produced no outputs"));
        }
        let fused = outputs.swap_remove(0);
        let view = fused
            .to_array_view::<f32>()
            .map_err(|e| BgSwapError::inference(format!("segmentation output is not f32: {e}")))?;
        let mask = owned_mask(view)?;

        log::debug!(
            "🔮 Mask {:?} from input {:?} in {}ms",
            mask.dim(),
            input.dim(),
            started.elapsed().as_millis()
        );
        Ok(mask)
    }

    fn is_initialized(&self) -> bool {
        self.plan.is_some()
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.shape_of(|info| info.input_shape).unwrap_or(UNRESOLVED_INPUT)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.shape_of(|info| info.output_shape).unwrap_or(UNRESOLVED_OUTPUT)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.manager()?.get_preprocessing_config())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.manager()?.get_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSource, ModelSpec};

    #[test]
    fn test_unattached_backend_reports_fallback_shapes() {
        let backend = TractBackend::new();

        assert!(!backend.is_initialized());
        assert_eq!(backend.input_shape(), UNRESOLVED_INPUT);
        assert_eq!(backend.output_shape(), UNRESOLVED_OUTPUT);
        assert!(backend.get_model_info().is_err());
        assert!(backend.get_preprocessing_config().is_err());
    }

    #[test]
    fn test_unattached_backend_cannot_initialize_or_infer() {
        let mut backend = TractBackend::new();
        assert!(matches!(
            backend.initialize(&ModelConfig::default()),
            Err(BgSwapError::Internal(_))
        ));

        let input = Array4::<f32>::zeros((1, 3, 320, 320));
        assert!(matches!(backend.infer(&input), Err(BgSwapError::Inference(_))));
    }

    #[test]
    fn test_corrupt_model_file_is_a_model_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"not a protobuf").unwrap();
        let spec = ModelSpec {
            source: ModelSource::External(dir.path().to_path_buf()),
            variant: None,
        };
        let manager = ModelManager::from_spec(&spec).unwrap();
        let mut backend = TractBackend::with_model_manager(manager);

        let err = backend.initialize(&ModelConfig::default()).unwrap_err();
        assert!(matches!(err, BgSwapError::Model(_)), "{err}");
        assert!(!backend.is_initialized());
    }

    #[test]
    fn test_owned_mask_rejects_wrong_rank() {
        let flat = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 320, 320]));
        assert!(owned_mask(flat.view()).is_err());

        let mask = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 1, 8, 8]));
        assert_eq!(owned_mask(mask.view()).unwrap().dim(), (1, 1, 8, 8));
    }
}
