use std::sync::Arc;

use shared::{ModelStage, ModelStatusResponse};

use crate::inference::config::PipelineConfig;
use crate::inference::error::InferenceError;
use crate::inference::labels::LabelSchema;
use crate::inference::types::{NormalizedTensor, ScoreVector};

/// A loaded classifier: one normalized tensor in, one raw score per class out.
pub trait ScorePredictor: Send + Sync {
    fn predict(&self, tensor: &NormalizedTensor) -> Result<ScoreVector, InferenceError>;

    fn output_classes(&self) -> usize;

    /// Whether the model ends in a normalization layer and returns probabilities.
    fn emits_distribution(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub enum ModelHandle {
    Loaded(Arc<dyn ScorePredictor>),
    Unavailable { reason: String },
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelHandle::Loaded(p) => f
                .debug_struct("Loaded")
                .field("output_classes", &p.output_classes())
                .finish(),
            ModelHandle::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}

impl ModelHandle {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ModelHandle::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn validated(predictor: Arc<dyn ScorePredictor>, schema: &LabelSchema) -> Self {
        match schema.validate_cardinality(predictor.output_classes()) {
            Ok(()) => ModelHandle::Loaded(predictor),
            Err(e) => {
                log::error!("Rejecting {} model: {}", schema.name(), e);
                ModelHandle::unavailable(e.to_string())
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelHandle::Loaded(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ModelHandle::Loaded(_) => None,
            ModelHandle::Unavailable { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    binary: ModelHandle,
    multiclass: ModelHandle,
}

impl ModelRegistry {
    pub fn new(binary: ModelHandle, multiclass: ModelHandle) -> Self {
        Self { binary, multiclass }
    }

    pub fn from_predictors(
        binary: Arc<dyn ScorePredictor>,
        multiclass: Arc<dyn ScorePredictor>,
    ) -> Self {
        Self {
            binary: ModelHandle::validated(binary, LabelSchema::for_stage(ModelStage::Binary)),
            multiclass: ModelHandle::validated(
                multiclass,
                LabelSchema::for_stage(ModelStage::Multiclass),
            ),
        }
    }

    /// Loads both models from disk. Failures leave the slot `Unavailable`.
    pub fn load(config: &PipelineConfig) -> Self {
        let binary = load_handle(ModelStage::Binary, config);
        let multiclass = load_handle(ModelStage::Multiclass, config);
        Self { binary, multiclass }
    }

    pub fn handle(&self, stage: ModelStage) -> &ModelHandle {
        match stage {
            ModelStage::Binary => &self.binary,
            ModelStage::Multiclass => &self.multiclass,
        }
    }

    pub fn require(&self, stage: ModelStage) -> Result<Arc<dyn ScorePredictor>, InferenceError> {
        match self.handle(stage) {
            ModelHandle::Loaded(predictor) => Ok(Arc::clone(predictor)),
            ModelHandle::Unavailable { reason } => Err(InferenceError::ModelUnavailable {
                stage,
                reason: reason.clone(),
            }),
        }
    }

    pub fn status(&self) -> ModelStatusResponse {
        ModelStatusResponse {
            binary_model: self.binary.is_loaded(),
            multiclass_model: self.multiclass.is_loaded(),
            binary_reason: self.binary.reason().map(str::to_string),
            multiclass_reason: self.multiclass.reason().map(str::to_string),
        }
    }
}

/// Runs a zero image of `input_size` through `forward` and returns the output width.
pub fn warm_up<F>(stage: ModelStage, input_size: u32, forward: F) -> Result<usize, InferenceError>
where
    F: FnOnce(&NormalizedTensor) -> Result<ScoreVector, InferenceError>,
{
    let side = input_size as usize;
    let scores = forward(&NormalizedTensor::zeros((side, side, 3)))?;
    if scores.is_empty() {
        return Err(InferenceError::inference_failure(
            stage,
            "warm-up forward pass returned no scores",
        ));
    }
    Ok(scores.len())
}

#[cfg(feature = "torch")]
fn load_handle(stage: ModelStage, config: &PipelineConfig) -> ModelHandle {
    use crate::inference::model::TorchPredictor;

    let models = &config.models;
    let (path, emits_distribution) = match stage {
        ModelStage::Binary => (&models.binary_path, models.binary_emits_distribution),
        ModelStage::Multiclass => (&models.multiclass_path, models.multiclass_emits_distribution),
    };
    match TorchPredictor::load(
        stage,
        path,
        models.tensor_layout,
        config.image.target_size,
        emits_distribution,
    ) {
        Ok(predictor) => {
            log::info!(
                "{} model loaded successfully from {} ({} classes)",
                stage,
                path.display(),
                predictor.output_classes()
            );
            ModelHandle::validated(Arc::new(predictor), LabelSchema::for_stage(stage))
        }
        Err(e) => {
            log::error!("{} model loading failed: {}", stage, e);
            ModelHandle::unavailable(e.to_string())
        }
    }
}

#[cfg(not(feature = "torch"))]
fn load_handle(stage: ModelStage, config: &PipelineConfig) -> ModelHandle {
    let path = match stage {
        ModelStage::Binary => &config.models.binary_path,
        ModelStage::Multiclass => &config.models.multiclass_path,
    };
    log::warn!(
        "{} model at {} not loaded: built without the `torch` feature",
        stage,
        path.display()
    );
    ModelHandle::unavailable("server was built without the `torch` feature")
}
