//! Federated login: the OAuth flow's only job is to identify the user,
//! upsert the `users` row, store the provider token, and issue a bearer
//! session.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use alfred_google::oauth::{
    CALENDAR_SCOPE, GMAIL_READONLY_SCOPE, USERINFO_EMAIL_SCOPE, USERINFO_PROFILE_SCOPE,
};

use crate::app::{AppState, PendingOAuth};
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

/// Bearer sessions live this long.
const SESSION_TTL_DAYS: i64 = 30;
/// Pending OAuth states expire after this many minutes.
const STATE_TTL_MINUTES: i64 = 15;

#[derive(Deserialize)]
pub struct OAuthStartRequest {
    pub redirect_uri: String,
}

/// POST /api/auth/oauth/start — unauthenticated; begins login.
pub async fn oauth_start(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OAuthStartRequest>,
) -> ApiResult<Json<Value>> {
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::validation("oauth is not configured"))?;

    let nonce = Uuid::new_v4().to_string();
    state.oauth_states.insert(
        nonce.clone(),
        PendingOAuth {
            user_id: None,
            created_at: Utc::now(),
        },
    );
    prune_stale_states(&state);

    let auth_url = oauth.auth_url(
        &body.redirect_uri,
        &nonce,
        &[
            USERINFO_EMAIL_SCOPE,
            USERINFO_PROFILE_SCOPE,
            GMAIL_READONLY_SCOPE,
            CALENDAR_SCOPE,
        ],
    );
    Ok(Json(json!({ "auth_url": auth_url, "state": nonce })))
}

#[derive(Deserialize)]
pub struct OAuthCallbackRequest {
    pub code: String,
    pub state: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub device_tag: Option<String>,
}

/// POST /api/auth/oauth/callback — completes login and issues the session.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OAuthCallbackRequest>,
) -> ApiResult<Json<Value>> {
    let oauth = state
        .oauth
        .as_ref()
        .ok_or_else(|| ApiError::validation("oauth is not configured"))?;

    let pending = state
        .oauth_states
        .remove(&body.state)
        .ok_or_else(|| ApiError::validation("unknown or expired oauth state"))?
        .1;
    if pending.user_id.is_some() {
        return Err(ApiError::validation("state belongs to a connect flow"));
    }

    let tokens = oauth.exchange_code(&body.code, &body.redirect_uri).await?;
    let identity = oauth.userinfo(&tokens.access_token).await?;

    let user = state
        .store
        .upsert_user(&identity.id, &identity.email, &identity.name)?;
    state.store.put_provider_token(
        &user.id,
        "google",
        &tokens.access_token,
        tokens.refresh_token.as_deref(),
        &tokens.scopes(),
        tokens.expires_at(),
    )?;

    let (_, bearer) = state.store.create_session(
        &user.id,
        Duration::days(SESSION_TTL_DAYS),
        body.device_tag.as_deref(),
    )?;
    if let Some(device) = body.device_tag.as_deref() {
        state.notifier.register_device(&user.id, device);
    }

    // Returning users with prior state get their workers back right away.
    if state.store.user_has_prior_state(&user.id)? {
        state.services.start_for_user(&user.id);
    }

    info!(user = %user.id, "login complete");
    Ok(Json(json!({
        "token": bearer,
        "user": {
            "id": user.id,
            "email": user.email,
            "display_name": user.display_name,
            "timezone": user.timezone,
        }
    })))
}

/// POST /api/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> ApiResult<Json<Value>> {
    state.store.delete_session(&auth.token)?;
    state.notifier.forget_device(&auth.user_id);
    state.services.stop_for_user(&auth.user_id).await;
    info!(user = %auth.user_id, "logout complete");
    Ok(Json(json!({ "ok": true })))
}

pub(crate) fn prune_stale_states(state: &AppState) {
    let cutoff = Utc::now() - Duration::minutes(STATE_TTL_MINUTES);
    state.oauth_states.retain(|_, pending| pending.created_at > cutoff);
}
