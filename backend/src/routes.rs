use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use base64::Engine;
use futures::{StreamExt, TryStreamExt};
use serde_json::json;
use sha2::{Digest, Sha256};
use shared::{InferenceRequest, PredictionResponse, RequestHints};
use uuid::Uuid;

use crate::inference::{InferenceError, InferenceOutcome, InferencePipeline};
use crate::recommendation::care_recommendation;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("No image uploaded")]
    MissingImage,
    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: usize, limit: usize },
    #[error("Malformed upload: {0}")]
    InvalidUpload(String),
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Inference worker failed: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Inference(e) => e.error_code(),
            ApiError::MissingImage => "MISSING_IMAGE",
            ApiError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ApiError::InvalidUpload(_) => "INVALID_UPLOAD",
            ApiError::Base64(_) => "BASE64_DECODE_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for InferenceError {
    fn status_code(&self) -> StatusCode {
        match self {
            InferenceError::Decode(_) | InferenceError::Preprocessing(_) => {
                StatusCode::BAD_REQUEST
            }
            InferenceError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InferenceError::InferenceFailure { .. } | InferenceError::LabelSchemaMismatch { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_body(self.status_code(), self.error_code(), &self.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Inference(e) => e.status_code(),
            ApiError::MissingImage | ApiError::InvalidUpload(_) | ApiError::Base64(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        error_body(self.status_code(), self.error_code(), &self.to_string())
    }
}

fn error_body(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    log::error!("Request failed: {} ({})", message, status);
    HttpResponse::build(status).json(json!({
        "error": {
            "code": code,
            "message": message,
        }
    }))
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, max_upload_bytes: usize) {
    // base64 inflates by 4/3, plus room for the hint fields
    let json_limit = max_upload_bytes / 3 * 4 + 64 * 1024;
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/api/health").route(web::get().to(health)))
        .service(web::resource("/api/predict").route(web::post().to(predict_multipart)))
        .service(
            web::resource("/api/predict/json")
                .app_data(web::JsonConfig::default().limit(json_limit))
                .route(web::post().to(predict_json)),
        );
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().finish()
}

async fn health(pipeline: web::Data<InferencePipeline>) -> HttpResponse {
    HttpResponse::Ok().json(pipeline.model_status())
}

async fn predict_multipart(
    pipeline: web::Data<InferencePipeline>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let limit = pipeline.config().server.max_upload_bytes;
    let mut image: Option<Vec<u8>> = None;
    let mut plant_type = None;
    let mut water_freq = None;
    let mut language = None;

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::InvalidUpload(e.to_string()))?
    {
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .unwrap_or_default()
            .to_string();
        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::InvalidUpload(e.to_string()))?;
            if data.len() + chunk.len() > limit {
                return Err(ApiError::FileTooLarge {
                    size: data.len() + chunk.len(),
                    limit,
                });
            }
            data.extend_from_slice(&chunk);
        }
        match name.as_str() {
            "image" => image = Some(data),
            "plantType" => plant_type = Some(String::from_utf8_lossy(&data).into_owned()),
            "waterFreq" => water_freq = Some(String::from_utf8_lossy(&data).into_owned()),
            "language" => language = Some(String::from_utf8_lossy(&data).into_owned()),
            other => log::debug!("Ignoring form field '{}'", other),
        }
    }

    let image = image.filter(|d| !d.is_empty()).ok_or(ApiError::MissingImage)?;
    let hints = RequestHints::from_optional(plant_type, water_freq, language);
    run_prediction(pipeline, image, hints).await
}

async fn predict_json(
    pipeline: web::Data<InferencePipeline>,
    request: web::Json<InferenceRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    let encoded = match request.image_data.split_once(',') {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => request.image_data.as_str(),
    };
    if encoded.trim().is_empty() {
        return Err(ApiError::MissingImage);
    }
    let image = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
    let limit = pipeline.config().server.max_upload_bytes;
    if image.len() > limit {
        return Err(ApiError::FileTooLarge {
            size: image.len(),
            limit,
        });
    }
    let hints =
        RequestHints::from_optional(request.plant_type, request.water_freq, request.language);
    run_prediction(pipeline, image, hints).await
}

async fn run_prediction(
    pipeline: web::Data<InferencePipeline>,
    image: Vec<u8>,
    hints: RequestHints,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let image_hash = calculate_image_hash(&image);
    log::info!(
        "Request {}: {} bytes, image {}",
        request_id,
        image.len(),
        image_hash
    );

    let outcome = web::block(move || pipeline.infer(&image))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    let response = build_response(request_id, image_hash, outcome, hints);
    log::info!(
        "Request {}: {} ({:.4}) from {} model",
        response.request_id,
        response.prediction,
        response.confidence,
        response.model_used
    );
    Ok(HttpResponse::Ok().json(response))
}

pub fn calculate_image_hash(image_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_data);
    hex::encode(hasher.finalize())
}

fn build_response(
    request_id: Uuid,
    image_hash: String,
    outcome: InferenceOutcome,
    hints: RequestHints,
) -> PredictionResponse {
    let recommendation = care_recommendation(&outcome.verdict, &hints);
    let verdict = outcome.verdict;
    let (lo, hi) = verdict.confidence_interval;
    PredictionResponse {
        request_id: request_id.to_string(),
        image_hash,
        prediction: verdict.label,
        confidence: verdict.confidence,
        confidence_interval: [lo, hi],
        model_used: verdict.model_used,
        binary_prediction: verdict.binary_label,
        binary_confidence: verdict.binary_confidence,
        binary_output: outcome.binary.mean.into_vec(),
        multi_raw_output: outcome.multiclass.map(|m| m.mean.into_vec()),
        hints,
        recommendation,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}
