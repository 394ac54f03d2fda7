use shared::ModelStage;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Image preprocessing failed: {0}")]
    Preprocessing(String),
    #[error("{stage} model is not loaded: {reason}")]
    ModelUnavailable { stage: ModelStage, reason: String },
    #[error("{stage} model inference failed: {reason}")]
    InferenceFailure { stage: ModelStage, reason: String },
    #[error("Label schema '{schema}' expects {expected} classes but the model produces {actual}")]
    LabelSchemaMismatch {
        schema: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl InferenceError {
    pub fn inference_failure(stage: ModelStage, reason: impl Into<String>) -> Self {
        InferenceError::InferenceFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            InferenceError::Decode(_) => "DECODE_ERROR",
            InferenceError::Preprocessing(_) => "PREPROCESSING_ERROR",
            InferenceError::ModelUnavailable { .. } => "MODEL_UNAVAILABLE",
            InferenceError::InferenceFailure { .. } => "INFERENCE_FAILURE",
            InferenceError::LabelSchemaMismatch { .. } => "LABEL_SCHEMA_MISMATCH",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InferenceError::Decode(_) | InferenceError::Preprocessing(_)
        )
    }
}
