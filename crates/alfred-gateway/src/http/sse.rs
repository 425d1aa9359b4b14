//! Server-Sent Events: per-user status stream.
//!
//! Event names are stable; payloads are JSON. Heartbeats every 15 s keep
//! intermediaries from closing the connection.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tracing::debug;

use alfred_core::config::SSE_HEARTBEAT_SECS;

use crate::app::AppState;
use crate::auth::AuthedUser;

/// GET /api/sse — the token may arrive via `?token=` because EventSource
/// cannot set headers.
pub async fn sse(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.notifier.broadcaster().subscribe(&auth.user_id);
    debug!(user = %auth.user_id, "sse subscriber connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(user_event) => {
                    let event = Event::default()
                        .event(user_event.event.clone())
                        .data(user_event.data.to_string());
                    yield Ok(event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    // a slow client missed `skipped` events; tell it to resync
                    let event = Event::default()
                        .event("lagged")
                        .data(format!("{{\"skipped\":{skipped}}}"));
                    yield Ok(event);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(std::time::Duration::from_secs(SSE_HEARTBEAT_SECS))
            .event(Event::default().event("heartbeat").data("{}")),
    )
}
