//! Server-Sent Events stream of live operation events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, warn};

use audioshelf_realtime::OperationEvent;

use crate::dto::request::EventsQuery;
use crate::state::AppState;

/// GET /api/events
///
/// Every event is sent with its `type` as the SSE event name and the JSON
/// shape as data. The first frame is `connection.established`.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = query.operation.filter(|id| !id.trim().is_empty());
    debug!(operation_id = ?filter, "Event stream subscriber connected");

    let established = Event::default()
        .event("connection.established")
        .data(serde_json::json!({ "operation_id": filter }).to_string());

    let subscription = state.events.subscribe(filter);
    let live = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((event, subscription))
    })
    .filter_map(|event| async move { to_sse(&event).map(Ok) });

    let heartbeat = Duration::from_secs(state.config.realtime.heartbeat_seconds.max(1));
    Sse::new(stream::once(async move { Ok(established) }).chain(live))
        .keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
}

fn to_sse(event: &OperationEvent) -> Option<Event> {
    Event::default()
        .event(event.event_type())
        .json_data(event)
        .map_err(|e| warn!(error = %e, "Failed to encode operation event"))
        .ok()
}
