//! Mock inference backend for testing
//!
//! Exercises the model-based extraction path without model files or an
//! inference runtime.

use crate::{
    config::ModelConfig,
    error::{BgSwapError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{Arc, Mutex};

/// Mock backend producing a soft circular saliency map
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    model_info: ModelInfo,
    preprocessing_config: PreprocessingConfig,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    should_fail_init: bool,
    should_fail_inference: bool,
    /// Overrides the produced tensor shape
    output_override: Option<(usize, usize, usize, usize)>,
    /// Scale applied to the circle values, to exercise min-max normalization
    value_scale: f32,
}

impl MockBackend {
    /// Create a new mock backend with a 64x64 model input
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            model_info: ModelInfo {
                name: "mock-u2net".to_string(),
                size_bytes: 1024 * 1024,
                input_shape: (1, 3, 64, 64),
                output_shape: (1, 1, 64, 64),
            },
            preprocessing_config: PreprocessingConfig {
                target_size: [64, 64],
                normalization_mean: [0.485, 0.456, 0.406],
                normalization_std: [0.229, 0.224, 0.225],
            },
            call_history: Arc::new(Mutex::new(Vec::new())),
            should_fail_init: false,
            should_fail_inference: false,
            output_override: None,
            value_scale: 1.0,
        }
    }

    /// Create a mock backend that will fail during initialization
    #[must_use]
    pub fn new_failing_init() -> Self {
        let mut backend = Self::new();
        backend.should_fail_init = true;
        backend
    }

    /// Create a mock backend that will fail during inference
    #[must_use]
    pub fn new_failing_inference() -> Self {
        let mut backend = Self::new();
        backend.should_fail_inference = true;
        backend
    }

    /// Create a mock backend whose output has an unexpected shape
    #[must_use]
    pub fn with_output_shape(shape: (usize, usize, usize, usize)) -> Self {
        let mut backend = Self::new();
        backend.output_override = Some(shape);
        backend
    }

    /// Scale output values, e.g. to mimic unnormalized logits
    #[must_use]
    pub fn with_value_scale(mut self, scale: f32) -> Self {
        self.value_scale = scale;
        self
    }

    /// Shared handle to the call history
    #[must_use]
    pub fn call_history(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    fn generate_mock_output(&self) -> Array4<f32> {
        let (batch_size, channels, output_height, output_width) =
            self.output_override.unwrap_or(self.model_info.output_shape);
        let mut output = Array4::<f32>::zeros((batch_size, channels, output_height, output_width));

        let center_x = output_width as f32 / 2.0;
        let center_y = output_height as f32 / 2.0;
        let radius = (output_width.min(output_height) as f32 / 3.0).max(1.0);

        for ((_, _, y, x), value) in output.indexed_iter_mut() {
            let dx = x as f32 - center_x;
            let dy = y as f32 - center_y;
            let distance = (dx * dx + dy * dy).sqrt();
            let mask_value = if distance < radius {
                ((radius - distance) / radius).clamp(0.0, 1.0)
            } else {
                0.0
            };
            *value = mask_value * self.value_scale;
        }

        output
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &ModelConfig) -> Result<Option<Duration>> {
        self.record_call("initialize");

        if self.should_fail_init {
            return Err(BgSwapError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }

        self.initialized = true;
        Ok(Some(Duration::from_millis(5)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");

        if !self.initialized {
            return Err(BgSwapError::inference("Mock backend not initialized"));
        }
        if self.should_fail_inference {
            return Err(BgSwapError::inference("Mock backend inference failed"));
        }
        if input.shape().get(1).copied() != Some(3) {
            return Err(BgSwapError::inference("Input tensor must be NCHW with 3 channels"));
        }

        Ok(self.generate_mock_output())
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.input_shape
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        self.model_info.output_shape
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.record_call("get_preprocessing_config");
        Ok(self.preprocessing_config.clone())
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(self.model_info.clone())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_backend_lifecycle() {
        let mut backend = MockBackend::new();
        let history = backend.call_history();
        let input = Array4::<f32>::zeros((1, 3, 64, 64));

        assert!(backend.infer(&input).is_err());
        backend.initialize(&ModelConfig::default()).unwrap();
        let output = backend.infer(&input).unwrap();

        assert_eq!(output.shape(), &[1, 1, 64, 64]);
        assert!(output[[0, 0, 32, 32]] > 0.9);
        assert!(output[[0, 0, 0, 0]].abs() < f32::EPSILON);
        assert_eq!(
            *history.lock().unwrap(),
            vec!["infer", "initialize", "infer"]
        );
    }

    #[test]
    fn test_failing_variants() {
        let mut backend = MockBackend::new_failing_init();
        assert!(backend.initialize(&ModelConfig::default()).is_err());

        let mut backend = MockBackend::new_failing_inference();
        backend.initialize(&ModelConfig::default()).unwrap();
        assert!(backend.infer(&Array4::zeros((1, 3, 64, 64))).is_err());
    }
}
