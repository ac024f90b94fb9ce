//! Model-based extraction
//!
//! Runs a u2net-style salient object segmentation model through an
//! [`InferenceBackend`]. The backend is created and initialized on first use
//! and kept for the lifetime of the extractor.

use super::{apply_alpha, ExtractionMethod, MethodKind};
use crate::{
    config::ModelConfig,
    error::{BgSwapError, ExtractionError, Result},
    inference::{BackendFactory, InferenceBackend},
    models::ModelManager,
    types::ExtractionResult,
    utils::ImagePreprocessor,
};
use image::{DynamicImage, GenericImageView, GrayImage};
use instant::{Duration, Instant};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use tracing::{span, Level};

enum BackendSlot {
    Unloaded,
    /// Supplied by the caller, not yet initialized
    Injected(Box<dyn InferenceBackend>),
    Ready(Box<dyn InferenceBackend>),
    /// Loading failed; the reason is reported on every later call
    Failed(String),
}

/// Foreground extraction with a pretrained segmentation model
pub struct ModelExtractor {
    config: ModelConfig,
    backend_factory: Arc<dyn BackendFactory>,
    slot: Mutex<BackendSlot>,
    injected: bool,
}

impl ModelExtractor {
    /// Extractor that resolves `config.model_spec` and creates the backend lazily
    #[must_use]
    pub fn new(config: ModelConfig, backend_factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            config,
            backend_factory,
            slot: Mutex::new(BackendSlot::Unloaded),
            injected: false,
        }
    }

    /// Extractor around an already constructed backend
    ///
    /// The backend is initialized on first use. Probing always succeeds.
    #[must_use]
    pub fn with_backend(config: ModelConfig, backend: Box<dyn InferenceBackend>) -> Self {
        Self {
            config,
            backend_factory: Arc::new(crate::inference::DefaultBackendFactory),
            slot: Mutex::new(BackendSlot::Injected(backend)),
            injected: true,
        }
    }

    fn activate(&self, injected: Option<Box<dyn InferenceBackend>>) -> BackendSlot {
        match self.load_backend(injected) {
            Ok(backend) => BackendSlot::Ready(backend),
            Err(e) => {
                warn!("Model backend unavailable: {e}");
                BackendSlot::Failed(e.to_string())
            },
        }
    }

    fn load_backend(
        &self,
        injected: Option<Box<dyn InferenceBackend>>,
    ) -> Result<Box<dyn InferenceBackend>> {
        let mut backend = if let Some(backend) = injected {
            backend
        } else {
            let model_manager = ModelManager::from_spec(&self.config.model_spec)?;
            debug!(
                "Creating {} backend for {}",
                self.config.backend,
                model_manager.model_path().display()
            );
            self.backend_factory
                .create_backend(self.config.backend, model_manager)?
        };

        if let Some(load_time) = backend.initialize(&self.config)? {
            info!(
                "Model {} loaded in {:.2}ms",
                self.config.model_spec.source.display_name(),
                load_time.as_secs_f64() * 1000.0
            );
        }
        Ok(backend)
    }

    /// Run `f` against the initialized backend, loading it if needed
    fn with_backend_ready<T>(
        &self,
        f: impl FnOnce(&mut dyn InferenceBackend) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| BgSwapError::internal("Model backend lock poisoned"))?;

        let state = std::mem::replace(&mut *slot, BackendSlot::Unloaded);
        *slot = match state {
            BackendSlot::Unloaded => self.activate(None),
            BackendSlot::Injected(backend) => self.activate(Some(backend)),
            loaded => loaded,
        };

        match &mut *slot {
            BackendSlot::Ready(backend) => f(&mut **backend),
            BackendSlot::Failed(reason) => {
                Err(BgSwapError::model(format!("backend unavailable: {reason}")))
            },
            BackendSlot::Unloaded | BackendSlot::Injected(_) => {
                Err(BgSwapError::internal("Model backend was not activated"))
            },
        }
    }

    fn segment(&self, image: &DynamicImage) -> Result<GrayImage> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(BgSwapError::validation("Cannot segment an empty image"));
        }

        self.with_backend_ready(|backend| {
            let preprocessing = backend.get_preprocessing_config()?;

            let prepared = {
                let _span = span!(
                    Level::DEBUG,
                    "model_preprocessing",
                    target_size = preprocessing.target_size[0]
                )
                .entered();
                ImagePreprocessor::preprocess_for_inference(image, &preprocessing)?
            };

            let inference_start = Instant::now();
            let output = {
                let _span = span!(Level::DEBUG, "model_inference").entered();
                backend.infer(&prepared.tensor)?
            };
            debug!(
                "Inference completed in {:.2}ms",
                inference_start.elapsed().as_secs_f64() * 1000.0
            );

            ImagePreprocessor::tensor_to_mask(&output, &prepared.transformation)
        })
    }
}

/// Mean distance of mask values from the undecided midpoint, 0.0-1.0
fn mask_confidence(mask: &GrayImage) -> f32 {
    let total = u64::from(mask.width()) * u64::from(mask.height());
    if total == 0 {
        return 0.0;
    }
    let sum: f64 = mask
        .pixels()
        .map(|p| (f64::from(p[0]) / 255.0 * 2.0 - 1.0).abs())
        .sum();
    (sum / total as f64) as f32
}

impl ExtractionMethod for ModelExtractor {
    fn kind(&self) -> MethodKind {
        MethodKind::Model
    }

    fn probe(&self) -> bool {
        if self.injected {
            return true;
        }
        let supported = self.backend_factory.supports(self.config.backend);
        let resolvable = ModelManager::is_resolvable(&self.config.model_spec);
        debug!(
            "Model probe: backend {} supported={}, model {} resolvable={}",
            self.config.backend,
            supported,
            self.config.model_spec.source.display_name(),
            resolvable
        );
        supported && resolvable
    }

    fn extract(&self, image: &DynamicImage) -> std::result::Result<ExtractionResult, ExtractionError> {
        let mask = self
            .segment(image)
            .map_err(|e| ExtractionError::new(MethodKind::Model, e.to_string()))?;
        let confidence = mask_confidence(&mask);
        Ok(ExtractionResult::new(apply_alpha(image, &mask), MethodKind::Model)
            .with_confidence(confidence))
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_ms.map(Duration::from_millis)
    }
}
