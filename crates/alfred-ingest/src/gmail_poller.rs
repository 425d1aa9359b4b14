//! Per-user Gmail polling worker.
//!
//! Enumerates the user's enabled email sources every poll interval,
//! over-fetches with Gmail's day-granular `after:` operator, re-applies
//! the exact cutoff on `internalDate`, and publishes each new email with
//! its thread context. `processed_emails` is only *read* here — marking
//! happens downstream after a successful terminal parse, so a failed
//! analysis leaves the email eligible for the next poll.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use alfred_core::bus::BusPublisher;
use alfred_core::types::{EmailContext, IngestedMessage, Source, ThreadEntry, UserId};
use alfred_google::gmail::{build_query, GmailClient, GmailMessage};
use alfred_google::oauth::{OAuthClient, GMAIL_READONLY_SCOPE};
use alfred_store::Store;

use crate::error::Result;

/// Upper bound per channel per poll; keeps a burst from starving others.
const MAX_MESSAGES_PER_POLL: usize = 25;
/// Overlap re-scanned on every poll to absorb clock skew.
const OVERLAP_MINUTES: i64 = 5;

pub struct GmailPoller {
    store: Store,
    gmail: Arc<GmailClient>,
    oauth: Arc<OAuthClient>,
    publisher: BusPublisher,
    poll_interval: std::time::Duration,
}

impl GmailPoller {
    pub fn new(
        store: Store,
        gmail: Arc<GmailClient>,
        oauth: Arc<OAuthClient>,
        publisher: BusPublisher,
        poll_minutes: u64,
    ) -> Self {
        Self {
            store,
            gmail,
            oauth,
            publisher,
            poll_interval: std::time::Duration::from_secs(poll_minutes * 60),
        }
    }

    /// Spawn the poll loop for one user. The token cancels it.
    pub fn spawn_for_user(self: Arc<Self>, user_id: UserId) -> CancellationToken {
        let cancel = CancellationToken::new();
        let poller = self;
        let token = cancel.clone();
        tokio::spawn(async move {
            info!(user = %user_id, "gmail poller started");
            let last_poll = Mutex::new(Utc::now() - chrono::Duration::from_std(poller.poll_interval).unwrap_or(Duration::minutes(5)));
            let mut interval = tokio::time::interval(poller.poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!(user = %user_id, "gmail poller stopped");
                        return;
                    }
                    _ = interval.tick() => {
                        let mut last = last_poll.lock().await;
                        match poller.poll_once(&user_id, *last).await {
                            Ok(()) => *last = Utc::now(),
                            Err(e) => warn!(user = %user_id, error = %e, "gmail poll failed"),
                        }
                    }
                }
            }
        });
        cancel
    }

    /// One poll pass over all enabled email sources.
    pub async fn poll_once(&self, user_id: &UserId, last_poll_at: DateTime<Utc>) -> Result<()> {
        let Some(access_token) = self.usable_access_token(user_id).await? else {
            debug!(user = %user_id, "no usable gmail token, skipping poll");
            return Ok(());
        };

        let cutoff = last_poll_at - Duration::minutes(OVERLAP_MINUTES);
        let channels = self
            .store
            .list_channels(user_id, Some(Source::Gmail), true)?;

        for channel in channels {
            let query = build_query(channel.channel_type, &channel.identifier, cutoff.timestamp());
            let ids = self
                .gmail
                .list_message_ids(&access_token, &query, MAX_MESSAGES_PER_POLL)
                .await?;

            for id in ids {
                if self.store.is_email_processed(user_id, &id)? {
                    continue;
                }
                let message = self.gmail.get_message(&access_token, &id).await?;
                // exact cutoff — `after:` has day granularity
                if message.received_at < cutoff {
                    continue;
                }
                self.publish_email(user_id, channel.id, &access_token, message)
                    .await?;
            }
        }
        Ok(())
    }

    async fn publish_email(
        &self,
        user_id: &UserId,
        channel_id: i64,
        access_token: &str,
        message: GmailMessage,
    ) -> Result<()> {
        self.store
            .record_channel_message(channel_id, message.received_at)?;

        let row_id = self.store.insert_message(
            user_id,
            channel_id,
            Source::Gmail,
            &message.from,
            &message.from,
            Some(&message.subject),
            &message.body_text,
            message.received_at,
        )?;

        // Thread context travels with the message so the processor never
        // has to call Gmail itself.
        let thread = match self.gmail.get_thread(access_token, &message.thread_id).await {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| m.id != message.id)
                .map(|m| ThreadEntry {
                    from: m.from,
                    date: m.date,
                    body: m.body_text,
                })
                .collect(),
            Err(e) => {
                warn!(user = %user_id, error = %e, "thread fetch failed, proceeding without context");
                Vec::new()
            }
        };

        // Subject-only emails carry the subject in its own field; the body
        // may legitimately be empty.
        self.publisher
            .publish(IngestedMessage {
                user_id: user_id.clone(),
                channel_id,
                source: Source::Gmail,
                sender_id: message.from.clone(),
                sender_name: message.from.clone(),
                subject: Some(message.subject.clone()),
                text: message.body_text.clone(),
                timestamp: message.received_at,
                message_row_id: Some(row_id),
                email: Some(EmailContext {
                    email_id: message.id,
                    thread_id: message.thread_id,
                    from: message.from,
                    to: message.to,
                    date: message.date,
                    subject: message.subject,
                    thread,
                }),
            })
            .await?;
        Ok(())
    }

    /// Current access token, refreshed in place when expired. `None` when
    /// the user has no valid Gmail grant.
    async fn usable_access_token(&self, user_id: &UserId) -> Result<Option<String>> {
        let Some(token) = self.store.get_provider_token(user_id, "google")? else {
            return Ok(None);
        };
        if token.invalid || !token.has_scope(GMAIL_READONLY_SCOPE) {
            return Ok(None);
        }
        if !token.is_expired() {
            return Ok(Some(token.access_token));
        }

        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Ok(None);
        };
        match self.oauth.refresh(refresh_token).await {
            Ok(refreshed) => {
                self.store.update_access_token(
                    user_id,
                    "google",
                    &refreshed.access_token,
                    refreshed.expires_at(),
                )?;
                Ok(Some(refreshed.access_token))
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "gmail token refresh failed");
                self.store.mark_token_invalid(user_id, "google")?;
                Ok(None)
            }
        }
    }
}
