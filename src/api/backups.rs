//! Snapshot, backup and restore endpoints

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};

use super::dto::{ContextParams, IntegrityResponse, LifecycleRequest, SuccessResponse};
use crate::AppState;
use crate::error::AppError;
use crate::snapshot::{
    DatabaseStats, ImportSummary, Snapshot, database_stats, export_snapshot, import_snapshot,
};
use crate::storage::{
    BackupMetadata, BackupTrigger, FallbackEntry, LifecycleReport, ManualBackupReport,
};

/// Create backup router
///
/// Routes:
/// - GET /api/snapshot - Export a cycle snapshot
/// - POST /api/snapshot/import - Import a snapshot (`?cycle=` scopes it)
/// - GET /api/export - Download a wrapped export file
/// - POST /api/import - Import an uploaded export file
/// - GET/POST /api/backups - List backups, create one
/// - POST /api/backups/manual - Backup + fallback copy + export
/// - POST /api/backups/:id/restore - Restore a backup
/// - GET /api/fallback - List fallback copies
/// - POST /api/fallback/:key/restore - Restore a fallback copy
/// - GET /api/integrity - Shape check of the cycle snapshot
/// - GET /api/stats - Record counts and size
/// - POST /api/lifecycle - Hidden/unload signal
pub fn backups_router() -> Router<AppState> {
    Router::new()
        .route("/snapshot", get(export))
        .route("/snapshot/import", post(import))
        .route("/export", get(download_export))
        .route("/import", post(import_file))
        .route("/backups", get(list_backups).post(create_backup))
        .route("/backups/manual", post(manual_backup))
        .route("/backups/:id/restore", post(restore_backup))
        .route("/fallback", get(list_fallback))
        .route("/fallback/:key/restore", post(restore_fallback))
        .route("/integrity", get(integrity))
        .route("/stats", get(stats))
        .route("/lifecycle", post(lifecycle))
}

/// GET /api/snapshot
async fn export(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<Snapshot>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    Ok(Json(export_snapshot(&state.store, &context).await?))
}

/// POST /api/snapshot/import
///
/// With `?cycle=` the import is cycle-scoped and leaves users untouched.
async fn import(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
    Json(snapshot): Json<Snapshot>,
) -> Result<Json<SuccessResponse<ImportSummary>>, AppError> {
    let context = state.context(None, params.user_id.as_deref())?;
    let summary =
        import_snapshot(&state.store, &snapshot, params.cycle.as_deref(), &context).await?;
    Ok(Json(SuccessResponse::ok(summary)))
}

/// GET /api/export
async fn download_export(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Response, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let (file_name, document) = state.backup.export_document(&context).await?;
    let body = serde_json::to_vec_pretty(&document)?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// POST /api/import
///
/// Body is the raw export file. A safety backup is taken first.
async fn import_file(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
    body: Bytes,
) -> Result<Json<SuccessResponse<ImportSummary>>, AppError> {
    let context = state.context(None, params.user_id.as_deref())?;
    let summary = state
        .backup
        .import_document(&body, params.cycle.as_deref(), &context)
        .await?;
    Ok(Json(SuccessResponse::ok(summary)))
}

// =============================================================================
// Backups
// =============================================================================

/// GET /api/backups
async fn list_backups(
    State(state): State<AppState>,
) -> Result<Json<Vec<BackupMetadata>>, AppError> {
    Ok(Json(state.backup.list_backups().await?))
}

/// POST /api/backups
async fn create_backup(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<(StatusCode, Json<BackupMetadata>), AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let metadata = state
        .backup
        .create_backup(&context, BackupTrigger::Manual)
        .await?;
    Ok((StatusCode::CREATED, Json(metadata)))
}

/// POST /api/backups/manual
async fn manual_backup(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<SuccessResponse<ManualBackupReport>>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let report = state.backup.manual_backup(&context).await?;
    Ok(Json(SuccessResponse::ok(report)))
}

/// POST /api/backups/:id/restore
async fn restore_backup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<SuccessResponse<ImportSummary>>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let summary = state.backup.restore_from_backup(&id, &context).await?;
    Ok(Json(SuccessResponse::ok(summary)))
}

/// GET /api/fallback
async fn list_fallback(
    State(state): State<AppState>,
) -> Result<Json<Vec<FallbackEntry>>, AppError> {
    Ok(Json(state.backup.list_fallback().await?))
}

/// POST /api/fallback/:key/restore
async fn restore_fallback(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<SuccessResponse<ImportSummary>>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let summary = state.backup.restore_from_fallback(&key, &context).await?;
    Ok(Json(SuccessResponse::ok(summary)))
}

// =============================================================================
// Diagnostics and lifecycle
// =============================================================================

/// GET /api/integrity
async fn integrity(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<IntegrityResponse>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    Ok(Json(IntegrityResponse {
        valid: state.backup.check_data_integrity(&context).await,
    }))
}

/// GET /api/stats
async fn stats(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<DatabaseStats>, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    Ok(Json(database_stats(&state.store, &context).await?))
}

/// POST /api/lifecycle
async fn lifecycle(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
    Json(request): Json<LifecycleRequest>,
) -> Result<(StatusCode, Json<LifecycleReport>), AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    let report = state.backup.handle_lifecycle(request.event, &context).await;
    Ok((StatusCode::ACCEPTED, Json(report)))
}
