//! Routes notification kinds to the user's SSE stream and, when a device
//! is registered, to the push provider. Push failures are logged, never
//! propagated — a missed notification must not fail the workflow that
//! triggered it.

use alfred_core::types::{Source, UserId};
use dashmap::DashMap;
use serde_json::json;
use tracing::warn;

use crate::broadcast::{EventBroadcaster, UserEvent};
use crate::email::EmailSender;
use crate::push::PushSender;

pub struct Notifier {
    broadcaster: EventBroadcaster,
    push: Option<PushSender>,
    #[allow(dead_code)]
    email: Option<EmailSender>,
    /// device token per user, registered at login.
    devices: DashMap<String, String>,
}

impl Notifier {
    pub fn new(push: Option<PushSender>, email: Option<EmailSender>) -> Self {
        Self {
            broadcaster: EventBroadcaster::new(),
            push,
            email,
            devices: DashMap::new(),
        }
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Remember where to push for this user (from the login device tag).
    pub fn register_device(&self, user_id: &UserId, device_token: &str) {
        if !device_token.is_empty() {
            self.devices
                .insert(user_id.as_str().to_string(), device_token.to_string());
        }
    }

    pub fn forget_device(&self, user_id: &UserId) {
        self.devices.remove(user_id.as_str());
    }

    // --- workflow notifications -----------------------------------------

    pub async fn proposal_created(&self, user_id: &UserId, kind: &str, id: i64, title: &str) {
        let data = json!({ "kind": kind, "id": id, "title": title });
        self.emit(user_id, "proposal_created", data.clone()).await;
        self.push(user_id, "New proposal", title, &data).await;
    }

    pub async fn sync_failed(&self, user_id: &UserId, kind: &str, id: i64, reason: &str) {
        let data = json!({ "kind": kind, "id": id, "reason": reason });
        self.emit(user_id, "sync_failed", data.clone()).await;
        self.push(user_id, "Calendar sync failed", reason, &data).await;
    }

    pub async fn reconnect_required(&self, user_id: &UserId, provider: &str) {
        let data = json!({ "provider": provider });
        self.emit(user_id, "reconnect_required", data.clone()).await;
        self.push(
            user_id,
            "Reconnect required",
            "Your calendar connection needs to be re-authenticated.",
            &data,
        )
        .await;
    }

    pub async fn reminder_due(&self, user_id: &UserId, id: i64, title: &str) {
        let data = json!({ "id": id, "title": title });
        self.emit(user_id, "reminder_due", data.clone()).await;
        self.push(user_id, "Reminder", title, &data).await;
    }

    // --- connection/status events (SSE only) -----------------------------

    pub async fn messaging_status(&self, user_id: &UserId, source: Source, connected: bool) {
        self.emit(
            user_id,
            "messaging_status",
            json!({ "source": source.as_str(), "connected": connected }),
        )
        .await;
    }

    pub async fn pairing_code(&self, user_id: &UserId, source: Source, code: &str) {
        self.emit(
            user_id,
            "pairing_code",
            json!({ "source": source.as_str(), "code": code }),
        )
        .await;
    }

    pub async fn sync_progress(&self, user_id: &UserId, source: Source, detail: &str) {
        self.emit(
            user_id,
            "sync_progress",
            json!({ "source": source.as_str(), "detail": detail }),
        )
        .await;
    }

    async fn emit(&self, user_id: &UserId, event: &str, data: serde_json::Value) {
        self.broadcaster.send(user_id, UserEvent::new(event, data));
    }

    async fn push(&self, user_id: &UserId, title: &str, body: &str, data: &serde_json::Value) {
        let Some(push) = &self.push else { return };
        let Some(token) = self.devices.get(user_id.as_str()) else {
            return;
        };
        if let Err(e) = push.send(token.value(), title, body, data).await {
            warn!(user = %user_id, error = %e, "push delivery failed");
        }
    }
}
