//! Event proposal endpoints. Ownership is enforced by the store: a row
//! belonging to someone else is indistinguishable from a missing one.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::types::EventStatus;
use alfred_store::events::EventPatch;

use crate::app::AppState;
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub channel_id: Option<i64>,
}

/// GET /api/events?status=&channel_id=
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<EventStatus>()
                .map_err(|_| ApiError::validation(format!("unknown status '{s}'")))
        })
        .transpose()?;
    let events = state
        .store
        .list_events(&auth.user_id, status, query.channel_id)?;
    Ok(Json(json!({ "events": events })))
}

/// GET /api/events/{id}
pub async fn get_event(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let event = state.store.get_event(&auth.user_id, id)?;
    Ok(Json(json!({ "event": event })))
}

#[derive(Deserialize)]
pub struct UpdateEventRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// PUT /api/events/{id} — allowed only while pending.
pub async fn update_event(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateEventRequest>,
) -> ApiResult<Json<Value>> {
    let event = state.store.update_pending_event(
        &auth.user_id,
        id,
        EventPatch {
            title: body.title,
            description: body.description,
            start_time: body.start_time,
            end_time: body.end_time,
            location: body.location,
        },
    )?;
    Ok(Json(json!({ "event": event })))
}

/// POST /api/events/{id}/confirm — transitions the row and hands it to
/// the sync worker off the request path.
pub async fn confirm_event(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let event = state.store.confirm_event(&auth.user_id, id)?;

    let sync = state.sync.clone();
    let user_id = auth.user_id.clone();
    tokio::spawn(async move {
        if let Err(e) = sync.sync_event(&user_id, id).await {
            tracing::warn!(event_id = id, error = %e, "post-confirm sync failed");
        }
    });

    Ok(Json(json!({ "event": event })))
}

/// POST /api/events/{id}/reject
pub async fn reject_event(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let event = state.store.reject_event(&auth.user_id, id)?;
    Ok(Json(json!({ "event": event })))
}
