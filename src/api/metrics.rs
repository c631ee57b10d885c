//! Prometheus metrics endpoint
//!
//! Gauges that mirror live state are refreshed on every scrape.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::metrics::{EVENT_SUBSCRIBERS, REGISTRY, SYNC_PENDING_CHANGES};

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    EVENT_SUBSCRIBERS.set(state.store.events().subscriber_count() as i64);
    SYNC_PENDING_CHANGES.set(i64::from(state.sync.status().pending_changes));

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type())],
            metrics_text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Create metrics router
///
/// Exposes the `/metrics` endpoint.
pub fn metrics_router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics_handler))
}
