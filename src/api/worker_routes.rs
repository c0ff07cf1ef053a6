//! Worker registration, reads, heartbeats and deliverables

use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, ApiResult, AppState};
use crate::error::MandateError;
use crate::models::{ActivityLogEntry, Deliverable, Mandate, MandateId, Worker, WorkerId, WorkerStatus};
use crate::watchdog::Heartbeat;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub mandate_id: MandateId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub outcome: Heartbeat,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DeliverableRequest {
    #[serde(default)]
    pub mandate_id: Option<MandateId>,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST /api/workers
async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> ApiResult<Worker> {
    let worker = state.workers.register(&req.name).await?;
    Ok(ApiResponse::ok(worker))
}

/// GET /api/workers/:worker_id/active-mandate
async fn active_mandate(
    State(state): State<AppState>,
    Path(worker_id): Path<WorkerId>,
) -> ApiResult<Option<Mandate>> {
    let mandate = state.controller.active_mandate(worker_id).await?;
    Ok(ApiResponse::ok(mandate))
}

/// GET /api/workers/:worker_id/status
async fn worker_status(
    State(state): State<AppState>,
    Path(worker_id): Path<WorkerId>,
) -> ApiResult<WorkerStatus> {
    let status = state.controller.status(worker_id).await?;
    Ok(ApiResponse::ok(status))
}

/// GET /api/workers/:worker_id/activity
async fn worker_activity(
    State(state): State<AppState>,
    Path(worker_id): Path<WorkerId>,
) -> ApiResult<Vec<ActivityLogEntry>> {
    let store = state.controller.store();
    if store.worker(worker_id).await.map_err(MandateError::from)?.is_none() {
        return Err(MandateError::WorkerNotFound { worker_id }.into());
    }
    let entries = store
        .activity_for_worker(worker_id)
        .await
        .map_err(MandateError::from)?;
    Ok(ApiResponse::ok(entries))
}

/// POST /api/workers/:worker_id/heartbeat
async fn heartbeat(
    State(state): State<AppState>,
    Path(worker_id): Path<WorkerId>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<HeartbeatResponse> {
    let outcome = state.watchdog.heartbeat(worker_id, req.mandate_id).await?;
    Ok(ApiResponse::ok(HeartbeatResponse { outcome }))
}

/// POST /api/workers/:worker_id/deliverables
async fn record_deliverable(
    State(state): State<AppState>,
    Path(worker_id): Path<WorkerId>,
    Json(req): Json<DeliverableRequest>,
) -> ApiResult<Deliverable> {
    let store = state.controller.store();
    if store.worker(worker_id).await.map_err(MandateError::from)?.is_none() {
        return Err(MandateError::WorkerNotFound { worker_id }.into());
    }
    if let Some(mandate_id) = req.mandate_id {
        if store.mandate(mandate_id).await.map_err(MandateError::from)?.is_none() {
            return Err(MandateError::MandateNotFound { mandate_id }.into());
        }
    }

    let deliverable = Deliverable::new(worker_id, req.mandate_id, state.controller.clock().now());
    store
        .record_deliverable(&deliverable)
        .await
        .map_err(MandateError::from)?;
    Ok(ApiResponse::ok(deliverable))
}

// ============================================================================
// Router Factory
// ============================================================================

pub fn create_worker_router(state: AppState) -> Router {
    Router::new()
        .route("/api/workers", post(register_worker))
        .route("/api/workers/:worker_id/active-mandate", get(active_mandate))
        .route("/api/workers/:worker_id/status", get(worker_status))
        .route("/api/workers/:worker_id/activity", get(worker_activity))
        .route("/api/workers/:worker_id/heartbeat", post(heartbeat))
        .route("/api/workers/:worker_id/deliverables", post(record_deliverable))
        .with_state(state)
}
