//! Partition endpoints
//!
//! Record CRUD over any enumerated partition, plus the settings singleton
//! and whole-cycle clearing.

use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde_json::Value;

use super::dto::{BulkUpsertRequest, ContextParams, CountResponse, RecordsResponse};
use crate::AppState;
use crate::data::records::{
    bulk_upsert, create_record, delete_record, get_settings, update_record, update_settings,
};
use crate::data::{PartitionHandle, StoreName};
use crate::error::AppError;

/// Create partition router
///
/// Routes:
/// - GET/POST/DELETE /api/partitions/:store - List, create, clear
/// - POST /api/partitions/:store/bulk - Bulk upsert
/// - GET/PUT/PATCH/DELETE /api/partitions/:store/:key - Single record
/// - GET/PATCH /api/settings - Settings singleton
/// - DELETE /api/data - Clear every partition of a cycle
pub fn partitions_router() -> Router<AppState> {
    Router::new()
        .route(
            "/partitions/:store",
            get(list_records).post(create).delete(clear_partition),
        )
        .route("/partitions/:store/bulk", axum::routing::post(bulk))
        .route(
            "/partitions/:store/:key",
            get(get_record).put(put_record).patch(patch_record).delete(remove_record),
        )
        .route("/settings", get(read_settings).patch(patch_settings))
        .route("/data", axum::routing::delete(clear_cycle))
}

fn handle(
    state: &AppState,
    store: &str,
    params: &ContextParams,
) -> Result<PartitionHandle, AppError> {
    let name: StoreName = store.parse()?;
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    Ok(state.store.partition(name, &context))
}

/// GET /api/partitions/:store
async fn list_records(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<RecordsResponse>, AppError> {
    let partition = handle(&state, &store, &params)?;
    let records = partition.values().await?;

    Ok(Json(RecordsResponse {
        partition: store,
        cycle: partition.cycle_name().map(str::to_string),
        count: records.len(),
        records,
    }))
}

/// POST /api/partitions/:store
async fn create(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(params): Query<ContextParams>,
    Json(record): Json<Value>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let partition = handle(&state, &store, &params)?;
    let created = create_record(&partition, record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// POST /api/partitions/:store/bulk
async fn bulk(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(params): Query<ContextParams>,
    Json(request): Json<BulkUpsertRequest>,
) -> Result<Json<CountResponse>, AppError> {
    let partition = handle(&state, &store, &params)?;
    let count = bulk_upsert(&partition, request.records).await?;
    Ok(Json(CountResponse { count: count as u64 }))
}

/// DELETE /api/partitions/:store
async fn clear_partition(
    State(state): State<AppState>,
    Path(store): Path<String>,
    Query(params): Query<ContextParams>,
) -> Result<Json<CountResponse>, AppError> {
    let partition = handle(&state, &store, &params)?;
    let count = partition.clear().await?;
    Ok(Json(CountResponse { count }))
}

/// GET /api/partitions/:store/:key
async fn get_record(
    State(state): State<AppState>,
    Path((store, key)): Path<(String, String)>,
    Query(params): Query<ContextParams>,
) -> Result<Json<Value>, AppError> {
    let partition = handle(&state, &store, &params)?;
    partition
        .get(&key)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// PUT /api/partitions/:store/:key
///
/// Stores the body as-is under `key`.
async fn put_record(
    State(state): State<AppState>,
    Path((store, key)): Path<(String, String)>,
    Query(params): Query<ContextParams>,
    Json(record): Json<Value>,
) -> Result<StatusCode, AppError> {
    let partition = handle(&state, &store, &params)?;
    partition.set(&key, &record).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/partitions/:store/:key
async fn patch_record(
    State(state): State<AppState>,
    Path((store, key)): Path<(String, String)>,
    Query(params): Query<ContextParams>,
    Json(changes): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let partition = handle(&state, &store, &params)?;
    Ok(Json(update_record(&partition, &key, changes).await?))
}

/// DELETE /api/partitions/:store/:key
async fn remove_record(
    State(state): State<AppState>,
    Path((store, key)): Path<(String, String)>,
    Query(params): Query<ContextParams>,
) -> Result<StatusCode, AppError> {
    let partition = handle(&state, &store, &params)?;
    delete_record(&partition, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Settings
// =============================================================================

/// GET /api/settings
async fn read_settings(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<Json<Value>, AppError> {
    let partition = handle(&state, StoreName::Settings.as_str(), &params)?;
    Ok(Json(get_settings(&partition).await?))
}

/// PATCH /api/settings
async fn patch_settings(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
    Json(changes): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let partition = handle(&state, StoreName::Settings.as_str(), &params)?;
    Ok(Json(update_settings(&partition, changes).await?))
}

/// DELETE /api/data
///
/// Clears every partition of the cycle. Users and backups are kept.
async fn clear_cycle(
    State(state): State<AppState>,
    Query(params): Query<ContextParams>,
) -> Result<StatusCode, AppError> {
    let context = state.context(params.cycle.as_deref(), params.user_id.as_deref())?;
    state.store.clear_all_cycle_data(&context).await?;
    Ok(StatusCode::NO_CONTENT)
}
