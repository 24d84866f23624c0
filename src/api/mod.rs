//! HTTP routes
//!
//! A thin adapter over [`CodeSandbox`]: handlers decode the body, call the
//! service and encode the result. Every [`ServiceError`] maps to a status
//! code with a `{"detail": ...}` body.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classify::ExecutionResult;
use crate::grading::GradeResult;
use crate::service::{CodeSandbox, ExecutionRequest, GradeRequest, ServiceError};

/// Shared handler state
#[derive(Clone)]
pub(crate) struct AppState {
    pub sandbox: CodeSandbox,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(sandbox: CodeSandbox) -> Self {
        Self {
            sandbox,
            started_at: Utc::now(),
        }
    }
}

/// Create the API router
pub(crate) fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/execute", post(execute))
        .route("/grade", post(grade))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
    pub service: String,
    pub runtime_available: bool,
    pub started_at: DateTime<Utc>,
}

/// GET /
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let runtime_available = state.sandbox.health().await;
    let status = if runtime_available { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        service: "Code Sandbox API".to_string(),
        runtime_available,
        started_at: state.started_at,
    })
}

/// POST /execute
async fn execute(
    State(state): State<AppState>,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let result = state.sandbox.execute(&request).await?;
    Ok(Json(result))
}

/// POST /grade
async fn grade(
    State(state): State<AppState>,
    Json(request): Json<GradeRequest>,
) -> Result<Json<GradeResult>, ApiError> {
    let result = state.sandbox.grade(&request).await?;
    Ok(Json(result))
}

/// Service failure as an HTTP response.
#[derive(Debug)]
pub(crate) struct ApiError(ServiceError);

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        Self(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            ServiceError::UnsupportedLanguage { .. } => StatusCode::BAD_REQUEST,
            ServiceError::RuntimeUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::ImageMissing { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), "{}", self.0);
        }

        let body = serde_json::json!({ "detail": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}
