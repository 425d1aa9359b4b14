//! Per-user fan-out to SSE subscribers via tokio broadcast channels.
//!
//! Event names are stable — the mobile client switches on them.

use alfred_core::types::UserId;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// One status update on a user's stream.
#[derive(Debug, Clone, Serialize)]
pub struct UserEvent {
    /// Stable event name (e.g. "messaging_status", "proposal_created").
    pub event: String,
    /// JSON payload.
    pub data: serde_json::Value,
}

impl UserEvent {
    pub fn new(event: &str, data: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            data,
        }
    }
}

/// Fan-out events to each user's connected SSE clients.
///
/// Channels are created lazily on first use and kept for the process
/// lifetime; an idle channel is just a few words of memory.
#[derive(Default)]
pub struct EventBroadcaster {
    channels: DashMap<String, broadcast::Sender<UserEvent>>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new SSE connection subscribes to its user's stream.
    pub fn subscribe(&self, user_id: &UserId) -> broadcast::Receiver<UserEvent> {
        self.sender(user_id).subscribe()
    }

    /// Push an event to every subscriber of this user. Silently drops
    /// when nobody is listening.
    pub fn send(&self, user_id: &UserId, event: UserEvent) {
        let _ = self.sender(user_id).send(event);
    }

    /// Connected subscriber count across all users (for /health).
    pub fn subscriber_count(&self) -> usize {
        self.channels
            .iter()
            .map(|entry| entry.value().receiver_count())
            .sum()
    }

    fn sender(&self, user_id: &UserId) -> broadcast::Sender<UserEvent> {
        self.channels
            .entry(user_id.as_str().to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}
