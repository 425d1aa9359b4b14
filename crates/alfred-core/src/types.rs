use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a user (UUIDv7 — time-sortable for easier log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// External messaging provider a channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Whatsapp,
    Telegram,
    Gmail,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Whatsapp => "whatsapp",
            Source::Telegram => "telegram",
            Source::Gmail => "gmail",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Source::Whatsapp),
            "telegram" => Ok(Source::Telegram),
            "gmail" => Ok(Source::Gmail),
            other => Err(format!("unknown source: {}", other)),
        }
    }
}

/// Kind of endpoint a channel names within its source.
///
/// `Sender` and `Group` apply to messaging sources; `Category` and `Domain`
/// apply to Gmail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Sender,
    Group,
    Category,
    Domain,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Sender => "sender",
            ChannelType::Group => "group",
            ChannelType::Category => "category",
            ChannelType::Domain => "domain",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sender" => Ok(ChannelType::Sender),
            "group" => Ok(ChannelType::Group),
            "category" => Ok(ChannelType::Category),
            "domain" => Ok(ChannelType::Domain),
            other => Err(format!("unknown channel type: {}", other)),
        }
    }
}

/// Lifecycle of a calendar-event proposal.
///
/// pending → confirmed → synced; pending → rejected; synced → deleted
/// (local tombstone after a provider-side delete). No backward edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Confirmed,
    Synced,
    Rejected,
    Deleted,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Confirmed => "confirmed",
            EventStatus::Synced => "synced",
            EventStatus::Rejected => "rejected",
            EventStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "confirmed" => Ok(EventStatus::Confirmed),
            "synced" => Ok(EventStatus::Synced),
            "rejected" => Ok(EventStatus::Rejected),
            "deleted" => Ok(EventStatus::Deleted),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// Lifecycle of a reminder proposal. `completed` and `dismissed` are
/// reachable from both `confirmed` and `synced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Confirmed,
    Synced,
    Rejected,
    Completed,
    Dismissed,
}

impl ReminderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStatus::Pending => "pending",
            ReminderStatus::Confirmed => "confirmed",
            ReminderStatus::Synced => "synced",
            ReminderStatus::Rejected => "rejected",
            ReminderStatus::Completed => "completed",
            ReminderStatus::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReminderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReminderStatus::Pending),
            "confirmed" => Ok(ReminderStatus::Confirmed),
            "synced" => Ok(ReminderStatus::Synced),
            "rejected" => Ok(ReminderStatus::Rejected),
            "completed" => Ok(ReminderStatus::Completed),
            "dismissed" => Ok(ReminderStatus::Dismissed),
            other => Err(format!("unknown reminder status: {}", other)),
        }
    }
}

/// What the proposal asks the calendar provider to do once confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Create,
    Update,
    Delete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(ActionType::Create),
            "update" => Ok(ActionType::Update),
            "delete" => Ok(ActionType::Delete),
            other => Err(format!("unknown action type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(format!("unknown priority: {}", other)),
        }
    }
}

/// Machine-readable annotation on a proposal row. Never changes status;
/// informs the UI and the sync worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    LowConfidence,
    TimezoneFallback,
    SyncError,
}

impl QualityFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::LowConfidence => "low_confidence",
            QualityFlag::TimezoneFallback => "timezone_fallback",
            QualityFlag::SyncError => "sync_error",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the one-time history backfill for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackfillStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

impl BackfillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillStatus::Pending => "pending",
            BackfillStatus::Running => "running",
            BackfillStatus::Done => "done",
            BackfillStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BackfillStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BackfillStatus::Pending),
            "running" => Ok(BackfillStatus::Running),
            "done" => Ok(BackfillStatus::Done),
            "failed" => Ok(BackfillStatus::Failed),
            other => Err(format!("unknown backfill status: {}", other)),
        }
    }
}

/// Gmail-specific context carried alongside an ingested email so the
/// prompt builder never has to re-fetch the thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailContext {
    /// Provider message id — the `processed_emails` dedup key.
    pub email_id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub subject: String,
    /// Thread messages oldest-first, excluding the focus message.
    pub thread: Vec<ThreadEntry>,
}

/// One prior message of a Gmail thread, already trimmed for prompting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntry {
    pub from: String,
    pub date: String,
    pub body: String,
}

/// A normalized message on the shared ingestion bus.
///
/// By the time a message is published here the ingestion layer has already
/// resolved (or created) its channel row and persisted the body, so the
/// processor can go straight to analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestedMessage {
    pub user_id: UserId,
    pub channel_id: i64,
    pub source: Source,
    pub sender_id: String,
    pub sender_name: String,
    /// Subject line for Gmail items; `None` for chat messages.
    pub subject: Option<String>,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Row id of the persisted `source_messages` entry, when one exists.
    pub message_row_id: Option<i64>,
    /// Present only for Gmail messages.
    pub email: Option<EmailContext>,
}

/// Narrow capability handed to ingestion handlers so they can ask the
/// client manager for a contact refresh without holding the manager itself.
#[async_trait::async_trait]
pub trait ContactRefresher: Send + Sync {
    async fn refresh_contacts(&self, user_id: &UserId, source: Source);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn source_round_trips_through_str() {
        for s in [Source::Whatsapp, Source::Telegram, Source::Gmail] {
            assert_eq!(Source::from_str(s.as_str()).unwrap(), s);
        }
        assert!(Source::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn event_status_round_trips_through_str() {
        for s in [
            EventStatus::Pending,
            EventStatus::Confirmed,
            EventStatus::Synced,
            EventStatus::Rejected,
            EventStatus::Deleted,
        ] {
            assert_eq!(EventStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn reminder_status_round_trips_through_str() {
        for s in [
            ReminderStatus::Pending,
            ReminderStatus::Confirmed,
            ReminderStatus::Synced,
            ReminderStatus::Rejected,
            ReminderStatus::Completed,
            ReminderStatus::Dismissed,
        ] {
            assert_eq!(ReminderStatus::from_str(s.as_str()).unwrap(), s);
        }
    }

    #[test]
    fn user_ids_are_unique_and_sortable() {
        let a = UserId::new();
        let b = UserId::new();
        assert_ne!(a, b);
        // UUIDv7 — lexicographic order follows creation order.
        assert!(a.as_str() < b.as_str());
    }
}
