//! Channel management: list, enable/disable, explicit creation, and the
//! discoverable listing fed by ingestion-side discovery.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::types::{ChannelType, Source};

use crate::app::AppState;
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct ChannelQuery {
    #[serde(default)]
    pub source: Option<String>,
}

fn parse_source(raw: &Option<String>) -> Result<Option<Source>, ApiError> {
    raw.as_deref()
        .map(|s| {
            s.parse::<Source>()
                .map_err(|_| ApiError::validation(format!("unknown source '{s}'")))
        })
        .transpose()
}

/// GET /api/channels?source=...
pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&query.source)?;
    let channels = state.store.list_channels(&auth.user_id, source, false)?;
    Ok(Json(json!({ "channels": channels })))
}

/// GET /api/channels/discoverable?source=...
pub async fn discoverable_channels(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Query(query): Query<ChannelQuery>,
) -> ApiResult<Json<Value>> {
    let source = parse_source(&query.source)?
        .ok_or_else(|| ApiError::validation("source is required"))?;
    let channels = state
        .store
        .list_discoverable_channels(&auth.user_id, source)?;
    Ok(Json(json!({ "channels": channels })))
}

#[derive(Deserialize)]
pub struct CreateChannelRequest {
    pub source: String,
    pub channel_type: String,
    pub identifier: String,
    #[serde(default)]
    pub name: String,
}

/// POST /api/channels — explicit creation; enabled immediately.
pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Json(body): Json<CreateChannelRequest>,
) -> ApiResult<Json<Value>> {
    let source: Source = body
        .source
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown source '{}'", body.source)))?;
    let channel_type: ChannelType = body
        .channel_type
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown channel type '{}'", body.channel_type)))?;
    if body.identifier.trim().is_empty() {
        return Err(ApiError::validation("identifier is required"));
    }

    let channel = state.store.create_channel(
        &auth.user_id,
        source,
        channel_type,
        body.identifier.trim(),
        &body.name,
    )?;
    Ok(Json(json!({ "channel": channel })))
}

#[derive(Deserialize)]
pub struct UpdateChannelRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// PUT /api/channels/{id}
pub async fn update_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateChannelRequest>,
) -> ApiResult<Json<Value>> {
    if let Some(name) = body.name.as_deref() {
        state.store.rename_channel(&auth.user_id, id, name)?;
    }
    if let Some(enabled) = body.enabled {
        state.store.set_channel_enabled(&auth.user_id, id, enabled)?;
    }
    let channel = state.store.get_channel(&auth.user_id, id)?;
    Ok(Json(json!({ "channel": channel })))
}

/// DELETE /api/channels/{id} — message history survives by design.
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    state.store.delete_channel(&auth.user_id, id)?;
    Ok(Json(json!({ "ok": true })))
}
