//! Mandate posting and session transitions

use axum::{extract::State, response::Json, routing::post, Router};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ApiResponse, ApiResult, AppState};
use crate::models::{EndSummary, Mandate, MandateId, SessionTotals, WorkerId};
use crate::registry::NewMandate;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionRequest {
    pub worker_id: WorkerId,
    pub mandate_id: MandateId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndRequest {
    pub worker_id: WorkerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartResponse {
    pub mandate_id: MandateId,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST /api/mandates
async fn post_mandate(State(state): State<AppState>, Json(req): Json<NewMandate>) -> ApiResult<Mandate> {
    let mandate = state.mandates.post(req).await?;
    Ok(ApiResponse::ok(mandate))
}

/// POST /api/mandates/start
async fn start_mandate(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<StartResponse> {
    let mandate_id = state.controller.start(req.worker_id, req.mandate_id).await?;
    // Begin idle tracking from the moment work starts.
    if let Err(e) = state.watchdog.heartbeat(req.worker_id, mandate_id).await {
        debug!("Watchdog did not pick up worker {}: {}", req.worker_id, e);
    }
    Ok(ApiResponse::ok(StartResponse { mandate_id }))
}

/// POST /api/mandates/pause
async fn pause_mandate(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<SessionTotals> {
    let totals = state.controller.pause(req.worker_id, req.mandate_id).await?;
    // The next heartbeat resyncs from the store and resumes.
    state.watchdog.forget(req.worker_id).await;
    Ok(ApiResponse::ok(totals))
}

/// POST /api/mandates/resume
async fn resume_mandate(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> ApiResult<SessionTotals> {
    let totals = state.controller.resume(req.worker_id, req.mandate_id).await?;
    if let Err(e) = state.watchdog.heartbeat(req.worker_id, req.mandate_id).await {
        debug!("Watchdog did not pick up worker {}: {}", req.worker_id, e);
    }
    Ok(ApiResponse::ok(totals))
}

/// POST /api/mandates/end
async fn end_mandate(
    State(state): State<AppState>,
    Json(req): Json<EndRequest>,
) -> ApiResult<EndSummary> {
    let summary = state.controller.end(req.worker_id).await?;
    state.watchdog.forget(req.worker_id).await;
    Ok(ApiResponse::ok(summary))
}

// ============================================================================
// Router Factory
// ============================================================================

pub fn create_mandate_router(state: AppState) -> Router {
    Router::new()
        .route("/api/mandates", post(post_mandate))
        .route("/api/mandates/start", post(start_mandate))
        .route("/api/mandates/pause", post(pause_mandate))
        .route("/api/mandates/resume", post(resume_mandate))
        .route("/api/mandates/end", post(end_mandate))
        .with_state(state)
}
