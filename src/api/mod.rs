//! REST API for the mandate desk
//!
//! Every handler answers with the [`ApiResponse`] envelope. Controller errors
//! become [`ApiError`], whose status code follows the error's [`ErrorKind`].

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::controller::MandateSessionController;
use crate::error::{ErrorKind, MandateError};
use crate::registry::{MandateRegistry, WorkerRegistry};
use crate::watchdog::InactivityWatchdog;

pub mod mandate_routes;
pub mod worker_routes;

pub use mandate_routes::create_mandate_router;
pub use worker_routes::create_worker_router;

// ============================================================================
// Shared state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<MandateSessionController>,
    pub mandates: Arc<MandateRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub watchdog: Arc<InactivityWatchdog>,
}

impl AppState {
    pub fn new(controller: Arc<MandateSessionController>, watchdog: Arc<InactivityWatchdog>) -> Self {
        let store = controller.store().clone();
        Self {
            mandates: Arc::new(MandateRegistry::new(store.clone())),
            workers: Arc::new(WorkerRegistry::new(store)),
            controller,
            watchdog,
        }
    }

    /// State with a fresh watchdog using `idle_timeout`.
    pub fn with_idle_timeout(controller: Arc<MandateSessionController>, idle_timeout: Duration) -> Self {
        let watchdog = Arc::new(InactivityWatchdog::new(controller.clone(), idle_timeout));
        Self::new(controller, watchdog)
    }
}

// ============================================================================
// Envelope and errors
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

/// A controller error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub MandateError);

impl From<MandateError> for ApiError {
    fn from(err: MandateError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Invalid => StatusCode::BAD_REQUEST,
        ErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.0.to_string()),
            kind: Some(kind.as_str().to_string()),
        };
        (status_for(kind), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// ============================================================================
// Router Factory
// ============================================================================

async fn health_check() -> Json<ApiResponse<serde_json::Value>> {
    ApiResponse::ok(serde_json::json!({
        "status": "healthy",
        "service": "mandate-desk",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Full application router with tracing and CORS layers
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .merge(create_mandate_router(state.clone()))
        .merge(create_worker_router(state))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
}
