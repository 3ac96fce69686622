use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use thiserror::Error;
use tower_http::services::ServeDir;
use tracing::warn;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{PipelineError, ServiceBusy};
use crate::preprocess::check_supported_format;
use crate::progress::JobSnapshot;
use crate::service::{GradingService, Submission};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<GradingService>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(service: Arc<GradingService>, config: AppConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid progress ID")]
    NotFound,
    #[error(transparent)]
    Busy(#[from] ServiceBusy),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request<E: std::fmt::Display>(e: E) -> Self {
        Self::BadRequest(e.to_string())
    }
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::UnsupportedFormat(_) => Self::BadRequest(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub progress_id: String,
}

pub fn router(state: AppState) -> Router {
    let results = ServeDir::new(&state.config.results_dir);
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/analyze", post(analyze))
        .route("/progress/{progress_id}", get(progress))
        .route("/health", get(health))
        .nest_service("/results", results)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Accept an image and start grading it. Returns the id to poll.
pub async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let mut upload = None;
    let mut moisture = 0.0;
    let mut weight = 0.0;

    while let Some(field) = multipart.next_field().await.map_err(ApiError::bad_request)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(ApiError::bad_request)?;
                check_supported_format(&filename, content_type.as_deref(), &data)?;
                upload = Some((filename, data));
            }
            // Informational only; echoed back in the report.
            "moisture" => moisture = parse_number("moisture", &field.text().await.map_err(ApiError::bad_request)?)?,
            "weight" => weight = parse_number("weight", &field.text().await.map_err(ApiError::bad_request)?)?,
            _ => {}
        }
    }

    let (filename, data) = upload.ok_or_else(|| ApiError::BadRequest("missing image file".into()))?;
    if data.is_empty() {
        return Err(ApiError::BadRequest("empty image file".into()));
    }

    let admission = state.service.try_admit().inspect_err(|e| warn!("{}", e))?;
    let id = GradingService::new_job_id();
    let image_path = state
        .config
        .upload_dir
        .join(format!("{}{}", id, upload_extension(&filename)));
    tokio::fs::write(&image_path, &data).await.map_err(ApiError::internal)?;

    let id = state.service.start(
        admission,
        Submission {
            id,
            image_path,
            moisture,
            weight,
        },
    );
    Ok(Json(SubmitResponse {
        progress_id: id.to_string(),
    }))
}

/// Poll a job. A completed job is returned once and then forgotten.
pub async fn progress(
    State(state): State<AppState>,
    Path(progress_id): Path<String>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let id = Uuid::parse_str(&progress_id).map_err(|_| ApiError::NotFound)?;
    state.service.store().read(&id).map(Json).ok_or(ApiError::NotFound)
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "jobs": state.service.store().len(),
    }))
}

fn parse_number(field: &str, raw: &str) -> Result<f64, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("{} must be a number, got {:?}", field, raw)))
}

/// Extension of the uploaded file name, kept only when it is short and
/// alphanumeric.
fn upload_extension(filename: &str) -> String {
    FsPath::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default()
}
