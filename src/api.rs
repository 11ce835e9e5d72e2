//! HTTP surface: one route per service operation.

use crate::service::{
    HealthStatus, MarkdownRequest, MarkdownResponse, OcrRequest, OcrResponse, OcrService,
    SetupStatus,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OcrService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/setup", post(setup))
        .route("/ocr", post(ocr))
        .route("/to_markdown", post(to_markdown))
        .route("/health", get(health).post(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Uncaught operation failure, reported as a 500 with the full error chain.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = format!("{:#}", self.0);
        error!("Request failed: {}", message);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Load the model (if needed). Failures come back as a 200 with `status: "error"`.
async fn setup(State(state): State<AppState>) -> Json<SetupStatus> {
    Json(state.service.setup().await)
}

async fn ocr(
    State(state): State<AppState>,
    Json(request): Json<OcrRequest>,
) -> Result<Json<OcrResponse>, ApiError> {
    Ok(Json(state.service.extract_text(request).await?))
}

async fn to_markdown(
    State(state): State<AppState>,
    Json(request): Json<MarkdownRequest>,
) -> Result<Json<MarkdownResponse>, ApiError> {
    Ok(Json(state.service.to_markdown(request).await?))
}

async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.service.health())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::StubLoader;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_with(loader: Arc<StubLoader>) -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let service = OcrService::new(loader, dir.path().join("scratch"));
        let app = router(AppState {
            service: Arc::new(service),
        });
        (app, dir)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_get_and_post() {
        let (app, _dir) = app_with(Arc::new(StubLoader::new()));

        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "model_loaded": false}));

        let (status, _) = call(&app, Method::POST, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_setup_then_health_reports_device() {
        let (app, _dir) = app_with(Arc::new(StubLoader::new()));

        let (status, body) = call(&app, Method::POST, "/setup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model_name"], "deepseek-ai/DeepSeek-OCR");

        let (_, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(
            body,
            json!({"status": "ok", "model_loaded": true, "device": "cuda:0"})
        );
    }

    #[tokio::test]
    async fn test_setup_failure_is_still_ok_response() {
        let (app, _dir) = app_with(Arc::new(StubLoader::failing(1)));

        let (status, body) = call(&app, Method::POST, "/setup", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert_eq!(body["model_loaded"], false);
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ocr_applies_defaults() {
        let loader = Arc::new(StubLoader::new());
        let (app, _dir) = app_with(loader.clone());

        let (status, body) = call(&app, Method::POST, "/ocr", Some(json!({"image": "scan.png"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"text": "hello", "tokens": 3}));

        let requests = loader.model.requests.lock().unwrap();
        assert_eq!(requests[0].prompt, "<image>\nFree OCR.");
        assert_eq!(requests[0].base_size, 1024);
        assert_eq!(requests[0].image_size, 640);
        assert!(requests[0].crop_mode);
    }

    #[tokio::test]
    async fn test_to_markdown_ignores_prompt_field() {
        let loader = Arc::new(StubLoader::new());
        let (app, _dir) = app_with(loader.clone());

        let (status, body) = call(
            &app,
            Method::POST,
            "/to_markdown",
            Some(json!({"image": "doc.png", "prompt": "Free OCR.", "base_size": 640})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"markdown": "hello", "tokens": 3}));
        assert_eq!(
            loader.prompts(),
            vec!["<image>\n<|grounding|>Convert the document to markdown.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ocr_failure_is_server_error() {
        let (app, _dir) = app_with(Arc::new(StubLoader::failing(1)));

        let (status, body) = call(&app, Method::POST, "/ocr", Some(json!({"image": "scan.png"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_ocr_requires_image() {
        let (app, _dir) = app_with(Arc::new(StubLoader::new()));

        let (status, _) = call(&app, Method::POST, "/ocr", Some(json!({"prompt": "Free OCR."}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
