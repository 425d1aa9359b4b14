//! Calendar-provider connection management.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use alfred_google::oauth::CALENDAR_SCOPE;

use crate::app::{AppState, PendingOAuth};
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

/// GET /api/gcal/status
pub async fn gcal_status(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> ApiResult<Json<Value>> {
    let token = state.store.get_provider_token(&auth.user_id, "google")?;
    let connected = token
        .as_ref()
        .is_some_and(|t| !t.invalid && t.has_scope(CALENDAR_SCOPE));
    Ok(Json(json!({
        "connected": connected,
        "needs_reconnect": token.as_ref().is_some_and(|t| t.invalid),
    })))
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    pub redirect_uri: String,
}

/// POST /api/gcal/connect → {auth_url}
pub async fn gcal_connect(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Json(body): Json<ConnectRequest>,
) -> ApiResult<Json<Value>> {
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::validation("oauth is not configured"))?;

    let nonce = Uuid::new_v4().to_string();
    state.oauth_states.insert(
        nonce.clone(),
        PendingOAuth {
            user_id: Some(auth.user_id.clone()),
            created_at: Utc::now(),
        },
    );
    crate::http::auth::prune_stale_states(&state);

    let auth_url = oauth.auth_url(&body.redirect_uri, &nonce, &[CALENDAR_SCOPE]);
    Ok(Json(json!({ "auth_url": auth_url, "state": nonce })))
}

#[derive(Deserialize)]
pub struct GcalCallbackRequest {
    pub code: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub state: Option<String>,
}

/// POST /api/gcal/callback {code, redirect_uri}
pub async fn gcal_callback(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Json(body): Json<GcalCallbackRequest>,
) -> ApiResult<Json<Value>> {
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::validation("oauth is not configured"))?;

    // When the client echoes the state nonce, it must belong to this user.
    if let Some(nonce) = body.state.as_deref() {
        let pending = state
            .oauth_states
            .remove(nonce)
            .ok_or_else(|| ApiError::validation("unknown or expired oauth state"))?
            .1;
        if pending.user_id.as_ref() != Some(&auth.user_id) {
            return Err(ApiError::not_found());
        }
    }

    let tokens = oauth.exchange_code(&body.code, &body.redirect_uri).await?;
    state.store.put_provider_token(
        &auth.user_id,
        "google",
        &tokens.access_token,
        tokens.refresh_token.as_deref(),
        &tokens.scopes(),
        tokens.expires_at(),
    )?;

    info!(user = %auth.user_id, "calendar provider connected");
    Ok(Json(json!({ "ok": true })))
}

/// GET /api/gcal/calendars
pub async fn gcal_calendars(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> ApiResult<Json<Value>> {
    let token = state
        .store
        .get_provider_token(&auth.user_id, "google")?
        .filter(|t| !t.invalid && t.has_scope(CALENDAR_SCOPE))
        .ok_or_else(|| ApiError::validation("calendar is not connected"))?;

    let access_token = if token.is_expired() {
        let oauth = state
            .oauth
            .as_ref()
            .ok_or_else(|| ApiError::validation("oauth is not configured"))?;
        let refresh = token
            .refresh_token
            .as_deref()
            .ok_or_else(|| ApiError::validation("calendar needs re-authentication"))?;
        let refreshed = oauth.refresh(refresh).await?;
        state.store.update_access_token(
            &auth.user_id,
            "google",
            &refreshed.access_token,
            refreshed.expires_at(),
        )?;
        refreshed.access_token
    } else {
        token.access_token
    };

    let calendars = state.gcal.list_calendars(&access_token).await?;
    Ok(Json(json!({ "calendars": calendars })))
}
