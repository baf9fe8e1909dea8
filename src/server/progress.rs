// pixpack/src/server/progress.rs
use super::AppState;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use std::convert::Infallible;

/// `GET /progress`: one `data: {json}` event per image appended to any batch.
/// No ids, no retry hint and no replay; the feed only ends when the client
/// goes away or the server shuts down.
pub(super) async fn progress_feed(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscriber = state.broadcaster.subscribe();
    log::info!("Progress client {} connected", subscriber.id());

    let events = subscriber.filter_map(|event| async move {
        match Event::default().json_data(&event) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(e) => {
                log::warn!("Dropping unserializable progress event: {}", e);
                None
            }
        }
    });

    Sse::new(events)
}
