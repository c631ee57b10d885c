//! API layer
//!
//! HTTP handlers for:
//! - Partition CRUD and settings
//! - Snapshot export/import, backups and restore
//! - Sync status plus the sync hub contract
//! - Change notifications (SSE)
//! - Metrics (Prometheus)

mod backups;
mod dto;
mod events;
pub mod metrics;
mod partitions;
mod sync;

use axum::Router;

use crate::AppState;

pub use dto::*;

pub use backups::backups_router;
pub use events::events_router;
pub use metrics::metrics_router;
pub use partitions::partitions_router;
pub use sync::sync_router;

/// Upper bound on request bodies; full imports carry whole cycles
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// All `/api` routes
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(partitions_router())
        .merge(backups_router())
        .merge(sync_router())
        .merge(events_router())
}
