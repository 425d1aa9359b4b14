//! Reminder endpoints — the event surface plus complete/dismiss and
//! manual creation.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use alfred_core::types::{ActionType, Priority, ReminderStatus, Source};
use alfred_store::reminders::{NewReminder, ReminderPatch};

use crate::app::AppState;
use crate::auth::AuthedUser;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct RemindersQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub channel_id: Option<i64>,
}

/// GET /api/reminders?status=&channel_id=
pub async fn list_reminders(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Query(query): Query<RemindersQuery>,
) -> ApiResult<Json<Value>> {
    let status = query
        .status
        .as_deref()
        .map(|s| {
            s.parse::<ReminderStatus>()
                .map_err(|_| ApiError::validation(format!("unknown status '{s}'")))
        })
        .transpose()?;
    let reminders = state
        .store
        .list_reminders(&auth.user_id, status, query.channel_id)?;
    Ok(Json(json!({ "reminders": reminders })))
}

/// GET /api/reminders/{id}
pub async fn get_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let reminder = state.store.get_reminder(&auth.user_id, id)?;
    Ok(Json(json!({ "reminder": reminder })))
}

#[derive(Deserialize)]
pub struct CreateReminderRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Channel to attach to; manual reminders without context use 0.
    #[serde(default)]
    pub channel_id: Option<i64>,
}

/// POST /api/reminders — manual creation lands pending like any proposal,
/// so the confirm/sync flow stays uniform.
pub async fn create_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Json(body): Json<CreateReminderRequest>,
) -> ApiResult<Json<Value>> {
    if body.title.trim().is_empty() {
        return Err(ApiError::validation("title is required"));
    }
    let priority = body
        .priority
        .as_deref()
        .map(|p| {
            p.parse::<Priority>()
                .map_err(|_| ApiError::validation(format!("unknown priority '{p}'")))
        })
        .transpose()?
        .unwrap_or_default();

    // Attaching to a channel requires owning it.
    let (channel_id, source) = match body.channel_id {
        Some(id) => {
            let channel = state.store.get_channel(&auth.user_id, id)?;
            (channel.id, channel.source)
        }
        None => (0, Source::Whatsapp),
    };

    let reminder = state.store.insert_reminder(NewReminder {
        user_id: auth.user_id.clone(),
        channel_id,
        calendar_id: "primary".into(),
        title: body.title.trim().to_string(),
        description: body.description,
        location: body.location,
        due_date: body.due_date,
        reminder_time: body.reminder_time,
        priority,
        action_type: ActionType::Create,
        source,
        original_message_id: None,
        llm_reasoning: "manual creation".into(),
        llm_confidence: 1.0,
        quality_flags: vec![],
    })?;
    Ok(Json(json!({ "reminder": reminder })))
}

#[derive(Deserialize)]
pub struct UpdateReminderRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub reminder_time: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
}

/// PUT /api/reminders/{id} — allowed only while pending.
pub async fn update_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateReminderRequest>,
) -> ApiResult<Json<Value>> {
    let priority = body
        .priority
        .as_deref()
        .map(|p| {
            p.parse::<Priority>()
                .map_err(|_| ApiError::validation(format!("unknown priority '{p}'")))
        })
        .transpose()?;

    let reminder = state.store.update_pending_reminder(
        &auth.user_id,
        id,
        ReminderPatch {
            title: body.title,
            description: body.description,
            location: body.location,
            due_date: body.due_date,
            reminder_time: body.reminder_time,
            priority,
        },
    )?;
    Ok(Json(json!({ "reminder": reminder })))
}

/// POST /api/reminders/{id}/confirm
pub async fn confirm_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let reminder = state.store.confirm_reminder(&auth.user_id, id)?;

    let sync = state.sync.clone();
    let user_id = auth.user_id.clone();
    tokio::spawn(async move {
        if let Err(e) = sync.sync_reminder(&user_id, id).await {
            tracing::warn!(reminder_id = id, error = %e, "post-confirm sync failed");
        }
    });

    Ok(Json(json!({ "reminder": reminder })))
}

/// POST /api/reminders/{id}/reject
pub async fn reject_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let reminder = state.store.reject_reminder(&auth.user_id, id)?;
    Ok(Json(json!({ "reminder": reminder })))
}

/// POST /api/reminders/{id}/complete — local-only; the provider item, if
/// any, is left alone.
pub async fn complete_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let reminder = state.store.complete_reminder(&auth.user_id, id)?;
    Ok(Json(json!({ "reminder": reminder })))
}

/// POST /api/reminders/{id}/dismiss
pub async fn dismiss_reminder(
    State(state): State<Arc<AppState>>,
    auth: AuthedUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let reminder = state.store.dismiss_reminder(&auth.user_id, id)?;
    Ok(Json(json!({ "reminder": reminder })))
}
