use crate::error::AppError;
use crate::models::classify_types::{HealthStatus, PredictResponse};
use crate::services::classifier::InferenceError;
use crate::services::fs_service;
use crate::services::image_service::ImageSource;
use crate::services::pipeline::{InferencePipeline, PredictionError};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// 16MB max upload size
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Pokemon Detector</title></head>
<body>
  <h1>Pokemon Detector</h1>
  <form id="upload">
    <input type="file" name="file" accept=".png,.jpg,.jpeg,.gif,.bmp" required>
    <button type="submit">Identify</button>
  </form>
  <ol id="results"></ol>
  <p id="error" style="color: #b00"></p>
  <script>
    document.getElementById('upload').addEventListener('submit', async (event) => {
      event.preventDefault();
      const results = document.getElementById('results');
      const errorBox = document.getElementById('error');
      results.innerHTML = '';
      errorBox.textContent = '';
      const response = await fetch('/predict', { method: 'POST', body: new FormData(event.target) });
      const body = await response.json();
      if (!response.ok) {
        errorBox.textContent = body.error;
        return;
      }
      for (const p of body.predictions) {
        const item = document.createElement('li');
        item.textContent = `${p.class_name}: ${p.percentage}`;
        results.appendChild(item);
      }
    });
  </script>
</body>
</html>
"#;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<InferencePipeline>,
    pub top_k: usize,
}

/// An `AppError` paired with the HTTP status it maps to.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: AppError,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<AppError>) -> Self {
        Self {
            status,
            error: message.into(),
        }
    }

    fn bad_request(message: impl Into<AppError>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<PredictionError> for ApiError {
    fn from(err: PredictionError) -> Self {
        let status = match &err {
            PredictionError::NotInitialized(_) => StatusCode::SERVICE_UNAVAILABLE,
            PredictionError::InvalidTopK | PredictionError::Decode(_) => StatusCode::BAD_REQUEST,
            PredictionError::Inference(InferenceError::Remote(_)) => StatusCode::BAD_GATEWAY,
            PredictionError::Scratch(_) | PredictionError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, AppError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.error.message }));
        (self.status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/predict", post(predict_upload_handler))
        .route("/api/predict", post(predict_json_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub async fn start_server(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Pokemon Detector listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.pipeline.health())
}

/// POST /predict - multipart form with a `file` field
async fn predict_upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    if !state.pipeline.is_ready() {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Model not loaded. Please check server logs.",
        ));
    }

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        upload = Some((file_name, mime_type, bytes));
        break;
    }

    let (file_name, mime_type, bytes) =
        upload.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let file_name = file_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::bad_request("No file selected"))?;
    if !fs_service::is_allowed_upload(&file_name) {
        return Err(ApiError::bad_request("Invalid file type"));
    }

    let source = ImageSource::Upload {
        bytes: bytes.to_vec(),
        mime_type,
        file_name: Some(file_name),
    };
    run_prediction(state, source).await
}

#[derive(Debug, Deserialize)]
pub struct ImagePayload {
    pub image: Option<String>,
}

/// POST /api/predict - JSON body with a data URI or bare base64 image
async fn predict_json_handler(
    State(state): State<AppState>,
    payload: Result<Json<ImagePayload>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let image = payload
        .image
        .filter(|image| !image.is_empty())
        .ok_or_else(|| ApiError::bad_request("No image data provided"))?;

    let (mime_type, encoded) = split_data_uri(&image);
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::bad_request(format!("Invalid base64 image: {}", e)))?;

    let source = ImageSource::Upload {
        bytes,
        mime_type: Some(mime_type),
        file_name: None,
    };
    run_prediction(state, source).await
}

/// Split `data:image/png;base64,...` into MIME type and payload. Bare base64
/// is assumed to be JPEG.
pub fn split_data_uri(image: &str) -> (String, &str) {
    if let Some(rest) = image.strip_prefix("data:") {
        if let Some((header, encoded)) = rest.split_once(',') {
            let mime = header.split(';').next().unwrap_or_default();
            let mime = if mime.is_empty() { "image/jpeg" } else { mime };
            return (mime.to_string(), encoded);
        }
    }
    ("image/jpeg".to_string(), image)
}

async fn run_prediction(
    state: AppState,
    source: ImageSource,
) -> Result<Json<PredictResponse>, ApiError> {
    let pipeline = state.pipeline.clone();
    let top_k = state.top_k;

    let result = tokio::task::spawn_blocking(move || pipeline.predict(source, top_k))
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prediction task failed: {}", e),
            )
        })?;

    match result {
        Ok(predictions) => Ok(Json(PredictResponse { predictions })),
        Err(e) => {
            error!("Prediction error: {}", e);
            Err(e.into())
        }
    }
}
