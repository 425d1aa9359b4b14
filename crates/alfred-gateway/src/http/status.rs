//! User status and onboarding lifecycle.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use alfred_core::types::Source;
use alfred_google::oauth::CALENDAR_SCOPE;

use crate::app::AppState;
use crate::auth::AuthedUser;
use crate::error::ApiResult;

/// GET /api/status — the mobile client's home-screen snapshot.
pub async fn status(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> ApiResult<Json<Value>> {
    let user = state.store.get_user(&auth.user_id)?;

    let mut sources = serde_json::Map::new();
    for source in [Source::Whatsapp, Source::Telegram] {
        let session = state.store.get_messaging_session(&auth.user_id, source)?;
        sources.insert(
            source.as_str().to_string(),
            json!({
                "paired": session.is_some(),
                "connected": session.as_ref().is_some_and(|s| s.connected),
                "running": state.clients.is_running(&auth.user_id, source),
            }),
        );
    }

    let google = state.store.get_provider_token(&auth.user_id, "google")?;
    let calendar_connected = google
        .as_ref()
        .is_some_and(|t| !t.invalid && t.has_scope(CALENDAR_SCOPE));

    Ok(Json(json!({
        "user": {
            "id": user.id,
            "email": user.email,
            "display_name": user.display_name,
            "timezone": user.timezone,
        },
        "sources": sources,
        "calendar_connected": calendar_connected,
        "services_running": alfred_engine::scheduler::RunGate::is_running(
            state.services.as_ref(),
            &auth.user_id
        ),
    })))
}

#[derive(Deserialize)]
pub struct OnboardingCompleteRequest {
    #[serde(default)]
    pub whatsapp_enabled: bool,
    #[serde(default)]
    pub telegram_enabled: bool,
    #[serde(default)]
    pub gmail_enabled: bool,
}

/// POST /api/onboarding/complete — the explicit start trigger.
pub async fn onboarding_complete(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Json(body): Json<OnboardingCompleteRequest>,
) -> ApiResult<Json<Value>> {
    if body.whatsapp_enabled {
        state
            .store
            .upsert_messaging_session(&auth.user_id, Source::Whatsapp, None)?;
    }
    if body.telegram_enabled {
        state
            .store
            .upsert_messaging_session(&auth.user_id, Source::Telegram, None)?;
    }
    // gmail_enabled needs no session row; the poller keys off the token scope
    let _ = body.gmail_enabled;

    state.services.start_for_user(&auth.user_id);
    info!(user = %auth.user_id, "onboarding complete");
    Ok(Json(json!({ "ok": true })))
}

/// POST /api/onboarding/reset — wipe sessions and tokens, keep the user
/// row (audit), stop all workers.
pub async fn onboarding_reset(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
) -> ApiResult<Json<Value>> {
    state.services.stop_for_user(&auth.user_id).await;
    state.clients.reset_user(&auth.user_id).await?;
    state.store.delete_provider_tokens(&auth.user_id)?;
    state.store.delete_sessions_for_user(&auth.user_id)?;
    state.notifier.forget_device(&auth.user_id);
    info!(user = %auth.user_id, "user reset");
    Ok(Json(json!({ "ok": true })))
}
