//! Applies a parsed `Analysis` to the proposal tables.
//!
//! `create` inserts a pending row (quality-flagged as needed) and
//! notifies the user; `update` overwrites provided fields of a pending
//! row; `delete` moves a pending row to `rejected` (the sender's
//! cancellation intent); `none` changes nothing.

use alfred_agent::tools::actions::{EventPayload, ReminderPayload};
use alfred_agent::{Analysis, AnalysisEntity};
use alfred_core::types::{ActionType, Priority, QualityFlag, Source, UserId};
use alfred_notify::Notifier;
use alfred_store::events::{EventPatch, NewEvent};
use alfred_store::reminders::{NewReminder, ReminderPatch};
use alfred_store::Store;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::time;

/// What an applied analysis did, for the trace row.
#[derive(Debug, Clone, PartialEq)]
pub enum AppliedAction {
    CreatedEvent(i64),
    UpdatedEvent(i64),
    RejectedEvent(i64),
    CreatedReminder(i64),
    UpdatedReminder(i64),
    RejectedReminder(i64),
    Nothing,
}

pub struct ProposalEngine {
    store: Store,
    notifier: Arc<Notifier>,
    confidence_floor: f64,
}

impl ProposalEngine {
    pub fn new(store: Store, notifier: Arc<Notifier>, confidence_floor: f64) -> Self {
        Self {
            store,
            notifier,
            confidence_floor,
        }
    }

    /// Dispatch by `analysis.action`. Unknown tags (empty string) are a
    /// validation failure recorded by the caller; no state changes.
    pub async fn apply(
        &self,
        user_id: &UserId,
        channel_id: i64,
        source: Source,
        trigger_message_id: Option<i64>,
        analysis: &Analysis,
        tz: Tz,
    ) -> Result<AppliedAction> {
        match analysis.action.as_str() {
            "none" => Ok(AppliedAction::Nothing),
            "create" | "update" | "delete" => match &analysis.entity {
                AnalysisEntity::Event(payload) => {
                    self.apply_event(
                        user_id,
                        channel_id,
                        trigger_message_id,
                        analysis,
                        payload,
                        tz,
                    )
                    .await
                }
                AnalysisEntity::Reminder(payload) => {
                    self.apply_reminder(
                        user_id,
                        channel_id,
                        source,
                        trigger_message_id,
                        analysis,
                        payload,
                        tz,
                    )
                    .await
                }
                AnalysisEntity::None => Err(EngineError::Validation(format!(
                    "action '{}' without an entity payload",
                    analysis.action
                ))),
            },
            other => Err(EngineError::Validation(format!(
                "unrecognized action tag '{other}'"
            ))),
        }
    }

    async fn apply_event(
        &self,
        user_id: &UserId,
        channel_id: i64,
        trigger_message_id: Option<i64>,
        analysis: &Analysis,
        payload: &EventPayload,
        tz: Tz,
    ) -> Result<AppliedAction> {
        match analysis.action.as_str() {
            "create" => {
                let title = payload
                    .title
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| EngineError::Validation("event create without title".into()))?;
                let raw_start = payload.start_time.as_deref().ok_or_else(|| {
                    EngineError::Validation("event create without start_time".into())
                })?;

                let start = time::resolve_in_zone(raw_start, tz)?;
                let end = payload
                    .end_time
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;

                let mut flags = Vec::new();
                if start.fallback {
                    flags.push(QualityFlag::TimezoneFallback);
                }
                if analysis.confidence < self.confidence_floor {
                    flags.push(QualityFlag::LowConfidence);
                }

                let event = self.store.insert_event(NewEvent {
                    user_id: user_id.clone(),
                    channel_id,
                    calendar_id: "primary".into(),
                    title: title.to_string(),
                    description: payload.description.clone().unwrap_or_default(),
                    start_time: start.rfc3339,
                    end_time: end.map(|e| e.rfc3339),
                    location: payload.location.clone().unwrap_or_default(),
                    action_type: ActionType::Create,
                    original_message_id: trigger_message_id,
                    llm_reasoning: analysis.reasoning.clone(),
                    llm_confidence: analysis.confidence,
                    quality_flags: flags,
                })?;

                info!(user = %user_id, event_id = event.id, "event proposal created");
                self.notifier
                    .proposal_created(user_id, "event", event.id, &event.title)
                    .await;
                Ok(AppliedAction::CreatedEvent(event.id))
            }
            "update" => {
                let id = require_entity_id(payload.alfred_entity_id)?;
                let start = payload
                    .start_time
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;
                let end = payload
                    .end_time
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;

                let updated = self.store.update_pending_event(
                    user_id,
                    id,
                    EventPatch {
                        title: payload.title.clone(),
                        description: payload.description.clone(),
                        start_time: start.map(|s| s.rfc3339),
                        end_time: end.map(|e| e.rfc3339),
                        location: payload.location.clone(),
                    },
                )?;
                info!(user = %user_id, event_id = updated.id, "event proposal updated in place");
                Ok(AppliedAction::UpdatedEvent(updated.id))
            }
            "delete" => {
                let id = require_entity_id(payload.alfred_entity_id)?;
                let rejected = self.store.reject_event(user_id, id)?;
                info!(user = %user_id, event_id = rejected.id,
                    "event proposal rejected (sender cancelled)");
                Ok(AppliedAction::RejectedEvent(rejected.id))
            }
            other => Err(EngineError::Validation(format!(
                "unexpected event action '{other}'"
            ))),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_reminder(
        &self,
        user_id: &UserId,
        channel_id: i64,
        source: Source,
        trigger_message_id: Option<i64>,
        analysis: &Analysis,
        payload: &ReminderPayload,
        tz: Tz,
    ) -> Result<AppliedAction> {
        match analysis.action.as_str() {
            "create" => {
                let title = payload
                    .title
                    .as_deref()
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        EngineError::Validation("reminder create without title".into())
                    })?;

                // due_date is optional — a description-only reminder is fine
                let due = payload
                    .due_date
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;
                let remind_at = payload
                    .reminder_time
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;

                let mut flags = Vec::new();
                if due.as_ref().is_some_and(|d| d.fallback)
                    || remind_at.as_ref().is_some_and(|r| r.fallback)
                {
                    flags.push(QualityFlag::TimezoneFallback);
                }
                if analysis.confidence < self.confidence_floor {
                    flags.push(QualityFlag::LowConfidence);
                }

                let priority = payload
                    .priority
                    .as_deref()
                    .and_then(|p| p.parse::<Priority>().ok())
                    .unwrap_or_default();

                let reminder = self.store.insert_reminder(NewReminder {
                    user_id: user_id.clone(),
                    channel_id,
                    calendar_id: "primary".into(),
                    title: title.to_string(),
                    description: payload.description.clone().unwrap_or_default(),
                    location: payload.location.clone().unwrap_or_default(),
                    due_date: due.map(|d| d.rfc3339),
                    reminder_time: remind_at.map(|r| r.rfc3339),
                    priority,
                    action_type: ActionType::Create,
                    source,
                    original_message_id: trigger_message_id,
                    llm_reasoning: analysis.reasoning.clone(),
                    llm_confidence: analysis.confidence,
                    quality_flags: flags,
                })?;

                info!(user = %user_id, reminder_id = reminder.id, "reminder proposal created");
                self.notifier
                    .proposal_created(user_id, "reminder", reminder.id, &reminder.title)
                    .await;
                Ok(AppliedAction::CreatedReminder(reminder.id))
            }
            "update" => {
                let id = require_entity_id(payload.alfred_entity_id)?;
                let due = payload
                    .due_date
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;
                let remind_at = payload
                    .reminder_time
                    .as_deref()
                    .map(|raw| time::resolve_in_zone(raw, tz))
                    .transpose()?;

                let updated = self.store.update_pending_reminder(
                    user_id,
                    id,
                    ReminderPatch {
                        title: payload.title.clone(),
                        description: payload.description.clone(),
                        location: payload.location.clone(),
                        due_date: due.map(|d| d.rfc3339),
                        reminder_time: remind_at.map(|r| r.rfc3339),
                        priority: payload
                            .priority
                            .as_deref()
                            .and_then(|p| p.parse::<Priority>().ok()),
                    },
                )?;
                info!(user = %user_id, reminder_id = updated.id, "reminder updated in place");
                Ok(AppliedAction::UpdatedReminder(updated.id))
            }
            "delete" => {
                let id = require_entity_id(payload.alfred_entity_id)?;
                let rejected = self.store.reject_reminder(user_id, id)?;
                info!(user = %user_id, reminder_id = rejected.id,
                    "reminder rejected (sender cancelled)");
                Ok(AppliedAction::RejectedReminder(rejected.id))
            }
            other => Err(EngineError::Validation(format!(
                "unexpected reminder action '{other}'"
            ))),
        }
    }
}

fn require_entity_id(id: Option<i64>) -> Result<i64> {
    id.ok_or_else(|| EngineError::Validation("missing alfred_entity_id".into()))
}
