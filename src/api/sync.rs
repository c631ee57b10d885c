//! Sync endpoints
//!
//! Client side: status, manual sync and connectivity signals.
//! Hub side: the upload/download contract other daemons sync against.

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::{get, post},
};
use serde_json::json;

use super::dto::{ConnectivityRequest, ContextParams};
use crate::AppState;
use crate::error::AppError;
use crate::sync::{SyncOutcome, SyncRequest, SyncResponse, SyncStatus};

/// Create sync router
///
/// Routes:
/// - GET /api/sync/status - Coordinator status
/// - POST /api/sync/force - Sync now
/// - POST /api/sync/connectivity - Online/offline signal
/// - POST /api/sync/upload - Hub: store an upload
/// - GET /api/sync/download - Hub: latest upload
/// - GET /api/health - Hub: connectivity probe
pub fn sync_router() -> Router<AppState> {
    Router::new()
        .route("/sync/status", get(status))
        .route("/sync/force", post(force))
        .route("/sync/connectivity", post(connectivity))
        .route("/sync/upload", post(hub_upload))
        .route("/sync/download", get(hub_download))
        .route("/health", get(hub_health))
}

/// GET /api/sync/status
async fn status(State(state): State<AppState>) -> Json<SyncStatus> {
    Json(state.sync.status())
}

/// POST /api/sync/force
async fn force(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let success = state.sync.force_sync(&context).await;
    Ok(Json(json!({ "success": success, "status": state.sync.status() })))
}

/// POST /api/sync/connectivity
async fn connectivity(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
    Json(request): Json<ConnectivityRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let outcome: SyncOutcome = state.sync.set_online(request.online, &context).await;
    Ok(Json(json!({ "outcome": outcome, "status": state.sync.status() })))
}

/// POST /api/sync/upload
///
/// Failures are reported in the response body, as the contract requires.
async fn hub_upload(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Json<SyncResponse> {
    match state.hub.upload(request).await {
        Ok(response) => Json(response),
        Err(error) => {
            tracing::error!(%error, "Sync hub upload failed");
            Json(SyncResponse::failure(error.to_string()))
        }
    }
}

/// GET /api/sync/download
async fn hub_download(State(state): State<AppState>) -> Json<SyncResponse> {
    match state.hub.download().await {
        Ok(response) => Json(response),
        Err(error) => {
            tracing::error!(%error, "Sync hub download failed");
            Json(SyncResponse::failure(error.to_string()))
        }
    }
}

/// GET /api/health
async fn hub_health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
