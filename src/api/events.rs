//! Change notification stream
//!
//! Server-Sent Events relaying every `DataChanged` event, plus a stream of
//! sync status changes. Closing the connection drops the subscription.

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;

use crate::AppState;

/// Create events router
///
/// Routes:
/// - GET /api/events - SSE stream of data changes
/// - GET /api/sync/events - SSE stream of sync status
pub fn events_router() -> Router<AppState> {
    Router::new()
        .route("/events", get(stream_events))
        .route("/sync/events", get(stream_sync_status))
}

/// GET /api/events
async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.store.events().subscribe();

    let stream = stream::unfold(subscription, |mut subscription| async move {
        let change = subscription.recv().await?;
        let event = match serde_json::to_string(&change) {
            Ok(data) => Event::default().event("data_changed").data(data),
            Err(error) => {
                tracing::warn!(%error, "Failed to encode change event");
                Event::default().comment("encoding error")
            }
        };
        Some((Ok(event), subscription))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/sync/events
///
/// Sends the current status first, then every change.
async fn stream_sync_status(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.sync.subscribe_status();

    let stream = stream::unfold((receiver, true), |(mut receiver, first)| async move {
        if !first {
            receiver.changed().await.ok()?;
        }
        let status = receiver.borrow_and_update().clone();
        let event = Event::default()
            .event("sync_status")
            .json_data(&status)
            .unwrap_or_else(|_| Event::default().comment("encoding error"));
        Some((Ok(event), (receiver, false)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
