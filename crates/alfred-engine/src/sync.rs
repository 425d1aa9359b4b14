//! Calendar sync worker.
//!
//! Confirmed proposals are pushed to the provider with bounded retries;
//! the 60 s sweeper picks up anything a transient failure left behind.
//! Auth failures refresh the token once; a failed refresh marks the token
//! invalid, notifies the user, and suppresses provider calls until
//! reconnection. The external id and the `synced` status are committed by
//! the same store statement.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use alfred_core::config::SYNC_SWEEP_INTERVAL_SECS;
use alfred_core::error::ErrorKind;
use alfred_core::types::{ActionType, QualityFlag, UserId};
use alfred_google::gcal::{CalendarClient, EventResource, EventTime, GcalEvent};
use alfred_google::oauth::{OAuthClient, TokenResponse, CALENDAR_SCOPE};
use alfred_notify::Notifier;
use alfred_store::events::CalendarEvent;
use alfred_store::reminders::Reminder;
use alfred_store::Store;

use crate::error::Result;

/// Attempts per sync trigger.
const MAX_ATTEMPTS: u32 = 5;
/// First backoff step.
const BACKOFF_BASE_SECS: u64 = 2;
/// Backoff ceiling between attempts.
const BACKOFF_CAP_SECS: u64 = 60;

/// Provider surface the worker needs — concrete client in production,
/// scripted stubs in tests.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventResource,
    ) -> alfred_google::Result<GcalEvent>;

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> alfred_google::Result<GcalEvent>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> alfred_google::Result<()>;
}

#[async_trait]
impl CalendarApi for CalendarClient {
    async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &EventResource,
    ) -> alfred_google::Result<GcalEvent> {
        CalendarClient::insert_event(self, access_token, calendar_id, event).await
    }

    async fn patch_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &EventResource,
    ) -> alfred_google::Result<GcalEvent> {
        CalendarClient::patch_event(self, access_token, calendar_id, event_id, event).await
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> alfred_google::Result<()> {
        CalendarClient::delete_event(self, access_token, calendar_id, event_id).await
    }
}

/// Token refresh surface, stubbed in tests.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> alfred_google::Result<TokenResponse>;
}

#[async_trait]
impl TokenRefresher for OAuthClient {
    async fn refresh(&self, refresh_token: &str) -> alfred_google::Result<TokenResponse> {
        OAuthClient::refresh(self, refresh_token).await
    }
}

enum AttemptOutcome {
    /// Row transitioned; done.
    Done,
    /// Transient failure; retry with backoff.
    Retry,
    /// Terminal for this trigger (auth suppressed, permanent error, or
    /// nothing to do); the row stays where it is.
    Stop,
}

pub struct SyncWorker {
    store: Store,
    calendar: Arc<dyn CalendarApi>,
    oauth: Arc<dyn TokenRefresher>,
    notifier: Arc<Notifier>,
}

impl SyncWorker {
    pub fn new(
        store: Store,
        calendar: Arc<dyn CalendarApi>,
        oauth: Arc<dyn TokenRefresher>,
        notifier: Arc<Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            calendar,
            oauth,
            notifier,
        })
    }

    /// Push one confirmed event, retrying transient failures.
    pub async fn sync_event(&self, user_id: &UserId, event_id: i64) -> Result<()> {
        let mut delay = BACKOFF_BASE_SECS;
        for attempt in 1..=MAX_ATTEMPTS {
            let event = self.store.get_event(user_id, event_id)?;
            match self.attempt_event(&event).await? {
                AttemptOutcome::Done | AttemptOutcome::Stop => return Ok(()),
                AttemptOutcome::Retry => {
                    warn!(event_id, attempt, "event sync attempt failed, backing off");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                        delay = (delay * 2).min(BACKOFF_CAP_SECS);
                    }
                }
            }
        }
        // Still confirmed; the periodic sweeper owns it now.
        info!(event_id, "event sync exhausted attempts, left for sweeper");
        Ok(())
    }

    /// Push one confirmed reminder (optional sync: only reminders with a
    /// concrete time get a provider item).
    pub async fn sync_reminder(&self, user_id: &UserId, reminder_id: i64) -> Result<()> {
        let mut delay = BACKOFF_BASE_SECS;
        for attempt in 1..=MAX_ATTEMPTS {
            let reminder = self.store.get_reminder(user_id, reminder_id)?;
            match self.attempt_reminder(&reminder).await? {
                AttemptOutcome::Done | AttemptOutcome::Stop => return Ok(()),
                AttemptOutcome::Retry => {
                    warn!(reminder_id, attempt, "reminder sync attempt failed, backing off");
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                        delay = (delay * 2).min(BACKOFF_CAP_SECS);
                    }
                }
            }
        }
        info!(reminder_id, "reminder sync exhausted attempts, left for sweeper");
        Ok(())
    }

    /// The periodic sweeper: re-drives everything still `confirmed`.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let worker = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                SYNC_SWEEP_INTERVAL_SECS,
            ));
            info!("sync sweeper started");
            loop {
                tokio::select! {
                    _ = interval.tick() => worker.sweep().await,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("sync sweeper shutting down");
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn sweep(&self) {
        let events = match self.store.confirmed_events() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "sweep: reading confirmed events failed");
                return;
            }
        };
        for event in events {
            debug!(event_id = event.id, "sweeper retrying event sync");
            let user_id = event.user_id.clone();
            if let Err(e) = self.sync_event(&user_id, event.id).await {
                warn!(event_id = event.id, error = %e, "sweeper event sync failed");
            }
        }

        let reminders = match self.store.confirmed_reminders() {
            Ok(reminders) => reminders,
            Err(e) => {
                warn!(error = %e, "sweep: reading confirmed reminders failed");
                return;
            }
        };
        for reminder in reminders {
            let user_id = reminder.user_id.clone();
            if let Err(e) = self.sync_reminder(&user_id, reminder.id).await {
                warn!(reminder_id = reminder.id, error = %e, "sweeper reminder sync failed");
            }
        }
    }

    async fn attempt_event(&self, event: &CalendarEvent) -> Result<AttemptOutcome> {
        if event.status != alfred_core::types::EventStatus::Confirmed {
            return Ok(AttemptOutcome::Stop);
        }
        let Some(access_token) = self.usable_access_token(&event.user_id).await? else {
            // no calendar connection (or suppressed after a failed refresh)
            return Ok(AttemptOutcome::Stop);
        };

        let resource = event_resource(event);
        let result = match event.action_type {
            ActionType::Create => {
                self.calendar
                    .insert_event(&access_token, &event.calendar_id, &resource)
                    .await
                    .map(Some)
            }
            ActionType::Update => {
                let Some(external_id) = event.external_event_id.as_deref() else {
                    self.record_permanent_event(event, "update without external event id")
                        .await?;
                    return Ok(AttemptOutcome::Stop);
                };
                self.calendar
                    .patch_event(&access_token, &event.calendar_id, external_id, &resource)
                    .await
                    .map(Some)
            }
            ActionType::Delete => {
                let Some(external_id) = event.external_event_id.as_deref() else {
                    self.record_permanent_event(event, "delete without external event id")
                        .await?;
                    return Ok(AttemptOutcome::Stop);
                };
                self.calendar
                    .delete_event(&access_token, &event.calendar_id, external_id)
                    .await
                    .map(|()| None)
            }
        };

        match result {
            Ok(Some(created)) => {
                self.store
                    .mark_event_synced(&event.user_id, event.id, &created.id)?;
                info!(event_id = event.id, external_id = %created.id, "event synced");
                Ok(AttemptOutcome::Done)
            }
            Ok(None) => {
                self.store.mark_event_deleted(&event.user_id, event.id)?;
                info!(event_id = event.id, "event deleted at provider");
                Ok(AttemptOutcome::Done)
            }
            Err(e) => self.handle_provider_error(&event.user_id, "event", event.id, e).await,
        }
    }

    async fn attempt_reminder(&self, reminder: &Reminder) -> Result<AttemptOutcome> {
        if reminder.status != alfred_core::types::ReminderStatus::Confirmed {
            return Ok(AttemptOutcome::Stop);
        }
        // Undated reminders live locally; nothing to mirror.
        let Some(when) = reminder
            .reminder_time
            .as_deref()
            .or(reminder.due_date.as_deref())
        else {
            return Ok(AttemptOutcome::Stop);
        };
        let Some(access_token) = self.usable_access_token(&reminder.user_id).await? else {
            return Ok(AttemptOutcome::Stop);
        };

        let resource = EventResource {
            summary: Some(reminder.title.clone()),
            description: Some(reminder.description.clone()),
            location: if reminder.location.is_empty() {
                None
            } else {
                Some(reminder.location.clone())
            },
            start: Some(EventTime {
                date_time: Some(when.to_string()),
                date: None,
                time_zone: None,
            }),
            end: Some(EventTime {
                date_time: Some(when.to_string()),
                date: None,
                time_zone: None,
            }),
        };

        match self
            .calendar
            .insert_event(&access_token, &reminder.calendar_id, &resource)
            .await
        {
            Ok(created) => {
                self.store
                    .mark_reminder_synced(&reminder.user_id, reminder.id, &created.id)?;
                info!(reminder_id = reminder.id, external_id = %created.id, "reminder synced");
                Ok(AttemptOutcome::Done)
            }
            Err(e) => {
                self.handle_provider_error(&reminder.user_id, "reminder", reminder.id, e)
                    .await
            }
        }
    }

    async fn handle_provider_error(
        &self,
        user_id: &UserId,
        kind: &str,
        id: i64,
        error: alfred_google::GoogleError,
    ) -> Result<AttemptOutcome> {
        match error.kind() {
            ErrorKind::TransientExternal => Ok(AttemptOutcome::Retry),
            ErrorKind::ProviderAuth => {
                warn!(user = %user_id, "provider auth failure during sync, refreshing token");
                if self.refresh_token(user_id).await {
                    Ok(AttemptOutcome::Retry)
                } else {
                    self.store.mark_token_invalid(user_id, "google")?;
                    self.notifier.reconnect_required(user_id, "google").await;
                    Ok(AttemptOutcome::Stop)
                }
            }
            _ => {
                // permanent: flag the row, tell the user, stop retrying
                if kind == "event" {
                    self.record_permanent_event_by_id(user_id, id, &error.to_string())
                        .await?;
                } else {
                    self.store
                        .add_reminder_quality_flag(user_id, id, QualityFlag::SyncError)?;
                    self.notifier
                        .sync_failed(user_id, kind, id, &error.to_string())
                        .await;
                }
                Ok(AttemptOutcome::Stop)
            }
        }
    }

    async fn record_permanent_event(&self, event: &CalendarEvent, reason: &str) -> Result<()> {
        self.record_permanent_event_by_id(&event.user_id, event.id, reason)
            .await
    }

    async fn record_permanent_event_by_id(
        &self,
        user_id: &UserId,
        event_id: i64,
        reason: &str,
    ) -> Result<()> {
        self.store
            .add_event_quality_flag(user_id, event_id, QualityFlag::SyncError)?;
        self.notifier
            .sync_failed(user_id, "event", event_id, reason)
            .await;
        Ok(())
    }

    /// Access token if the user has a valid, calendar-scoped grant;
    /// refreshes an expired token in place.
    async fn usable_access_token(&self, user_id: &UserId) -> Result<Option<String>> {
        let Some(token) = self.store.get_provider_token(user_id, "google")? else {
            return Ok(None);
        };
        if token.invalid || !token.has_scope(CALENDAR_SCOPE) {
            return Ok(None);
        }
        if !token.is_expired() {
            return Ok(Some(token.access_token));
        }
        if self.refresh_token(user_id).await {
            let refreshed = self.store.get_provider_token(user_id, "google")?;
            return Ok(refreshed.map(|t| t.access_token));
        }
        self.store.mark_token_invalid(user_id, "google")?;
        self.notifier.reconnect_required(user_id, "google").await;
        Ok(None)
    }

    /// True when the refresh round-trip succeeded and was stored.
    async fn refresh_token(&self, user_id: &UserId) -> bool {
        let token = match self.store.get_provider_token(user_id, "google") {
            Ok(Some(token)) => token,
            _ => return false,
        };
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return false;
        };
        match self.oauth.refresh(refresh_token).await {
            Ok(response) => {
                let stored = self.store.update_access_token(
                    user_id,
                    "google",
                    &response.access_token,
                    response.expires_at(),
                );
                stored.is_ok()
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "token refresh failed");
                false
            }
        }
    }
}

fn event_resource(event: &CalendarEvent) -> EventResource {
    EventResource {
        summary: Some(event.title.clone()),
        description: if event.description.is_empty() {
            None
        } else {
            Some(event.description.clone())
        },
        location: if event.location.is_empty() {
            None
        } else {
            Some(event.location.clone())
        },
        start: Some(EventTime {
            date_time: Some(event.start_time.clone()),
            date: None,
            time_zone: None,
        }),
        end: Some(EventTime {
            date_time: Some(
                event
                    .end_time
                    .clone()
                    .unwrap_or_else(|| event.start_time.clone()),
            ),
            date: None,
            time_zone: None,
        }),
    }
}
