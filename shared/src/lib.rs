use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Pixel range a normalized tensor is mapped into before it reaches a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum NormalizationMode {
    #[serde(rename = "zero_to_one")]
    #[strum(serialize = "zero_to_one")]
    ZeroToOne,
    #[default]
    #[serde(rename = "minus1_to_1")]
    #[strum(serialize = "minus1_to_1")]
    MinusOneToOne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
pub enum ModelStage {
    #[serde(rename = "binary")]
    #[strum(serialize = "binary")]
    Binary,
    #[serde(rename = "multiclass")]
    #[strum(serialize = "multiclass")]
    Multiclass,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct InferenceRequest {
    pub image_data: String,
    #[serde(rename = "plantType", default)]
    pub plant_type: Option<String>,
    #[serde(rename = "waterFreq", default)]
    pub water_freq: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RequestHints {
    #[serde(rename = "plantType")]
    pub plant_type: String,
    #[serde(rename = "waterFreq")]
    pub water_freq: String,
    pub language: String,
}

impl Default for RequestHints {
    fn default() -> Self {
        Self {
            plant_type: "unknown".into(),
            water_freq: "unknown".into(),
            language: "english".into(),
        }
    }
}

impl RequestHints {
    pub fn from_optional(
        plant_type: Option<String>,
        water_freq: Option<String>,
        language: Option<String>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            plant_type: plant_type.filter(|v| !v.is_empty()).unwrap_or(defaults.plant_type),
            water_freq: water_freq.filter(|v| !v.is_empty()).unwrap_or(defaults.water_freq),
            language: language.filter(|v| !v.is_empty()).unwrap_or(defaults.language),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PredictionResponse {
    pub request_id: String,
    pub image_hash: String,
    pub prediction: String,
    pub confidence: f32,
    pub confidence_interval: [f32; 2],
    pub model_used: ModelStage,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub binary_prediction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub binary_confidence: Option<f32>,
    pub binary_output: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub multi_raw_output: Option<Vec<f32>>,
    #[serde(flatten)]
    pub hints: RequestHints,
    pub recommendation: String,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ModelStatusResponse {
    pub binary_model: bool,
    pub multiclass_model: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub binary_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub multiclass_reason: Option<String>,
}
