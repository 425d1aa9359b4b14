//! Messaging-source pairing and status.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::types::Source;

use crate::app::AppState;
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

fn messaging_source(raw: &str) -> Result<Source, ApiError> {
    let source: Source = raw
        .parse()
        .map_err(|_| ApiError::validation(format!("unknown source '{raw}'")))?;
    if source == Source::Gmail {
        return Err(ApiError::validation("gmail is not a pairable source"));
    }
    Ok(source)
}

/// GET /api/sources/{source}/status
pub async fn source_status(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(raw): Path<String>,
) -> ApiResult<Json<Value>> {
    let source = messaging_source(&raw)?;
    let session = state.store.get_messaging_session(&auth.user_id, source)?;
    Ok(Json(json!({
        "source": source.as_str(),
        "paired": session.is_some(),
        "connected": session.as_ref().is_some_and(|s| s.connected),
        "phone_number": session.as_ref().and_then(|s| s.phone_number.clone()),
        "last_connected_at": session.and_then(|s| s.last_connected_at),
        "running": state.clients.is_running(&auth.user_id, source),
    })))
}

#[derive(Deserialize)]
pub struct PairRequest {
    pub phone_number: String,
}

/// POST /api/sources/{source}/pair — returns the provider pairing code.
pub async fn source_pair(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(raw): Path<String>,
    Json(body): Json<PairRequest>,
) -> ApiResult<Json<Value>> {
    let source = messaging_source(&raw)?;
    if body.phone_number.trim().is_empty() {
        return Err(ApiError::validation("phone_number is required"));
    }
    let code = state
        .clients
        .pair(&auth.user_id, source, body.phone_number.trim())
        .await?;
    Ok(Json(json!({ "code": code })))
}
