use crate::core::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

/// Stream status, stats and ready events as server-sent events
///
/// GET /events
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.bus.subscribe()).filter_map(|item| match item {
        Ok(event) => match event.to_json() {
            Ok(data) => Some(Ok(Event::default().event(event.name()).data(data))),
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to encode event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(skipped, "Event client lagged, events dropped");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
