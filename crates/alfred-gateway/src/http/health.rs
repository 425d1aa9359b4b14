use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — unauthenticated liveness + component readiness.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.store.ping(),
        "clients": state.clients.live_client_count(),
        "running_users": state.services.running_user_count(),
        "sse_subscribers": state.notifier.broadcaster().subscriber_count(),
        "oauth_configured": state.oauth.is_some(),
    }))
}
