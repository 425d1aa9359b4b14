//! Reminder proposals. Same guarded-transition discipline as events, plus
//! the due-notification scan used by the scheduler.

use alfred_core::types::{ActionType, Priority, QualityFlag, ReminderStatus, Source, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    pub id: i64,
    pub user_id: UserId,
    pub channel_id: i64,
    pub external_event_id: Option<String>,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub due_date: Option<String>,
    pub reminder_time: Option<String>,
    pub priority: Priority,
    pub status: ReminderStatus,
    pub action_type: ActionType,
    pub source: Source,
    pub original_message_id: Option<i64>,
    pub llm_reasoning: String,
    pub llm_confidence: f64,
    pub quality_flags: Vec<String>,
    pub due_notification_sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewReminder {
    pub user_id: UserId,
    pub channel_id: i64,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub location: String,
    pub due_date: Option<String>,
    pub reminder_time: Option<String>,
    pub priority: Priority,
    pub action_type: ActionType,
    pub source: Source,
    pub original_message_id: Option<i64>,
    pub llm_reasoning: String,
    pub llm_confidence: f64,
    pub quality_flags: Vec<QualityFlag>,
}

#[derive(Debug, Clone, Default)]
pub struct ReminderPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub due_date: Option<String>,
    pub reminder_time: Option<String>,
    pub priority: Option<Priority>,
}

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    use std::str::FromStr;
    let priority: String = row.get(10)?;
    let status: String = row.get(11)?;
    let action: String = row.get(12)?;
    let source: String = row.get(13)?;
    let flags_json: String = row.get(17)?;
    Ok(Reminder {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        channel_id: row.get(2)?,
        external_event_id: row.get(3)?,
        calendar_id: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        location: row.get(7)?,
        due_date: row.get(8)?,
        reminder_time: row.get(9)?,
        priority: Priority::from_str(&priority).unwrap_or_default(),
        status: ReminderStatus::from_str(&status).unwrap_or(ReminderStatus::Pending),
        action_type: ActionType::from_str(&action).unwrap_or(ActionType::Create),
        source: Source::from_str(&source).unwrap_or(Source::Whatsapp),
        original_message_id: row.get(14)?,
        llm_reasoning: row.get(15)?,
        llm_confidence: row.get(16)?,
        quality_flags: serde_json::from_str(&flags_json).unwrap_or_default(),
        due_notification_sent_at: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

const REMINDER_COLUMNS: &str = "id, user_id, channel_id, external_event_id, calendar_id, title, \
     description, location, due_date, reminder_time, priority, status, action_type, source, \
     original_message_id, llm_reasoning, llm_confidence, quality_flags, \
     due_notification_sent_at, created_at, updated_at";

impl Store {
    pub fn insert_reminder(&self, reminder: NewReminder) -> Result<Reminder> {
        let flags: Vec<&str> = reminder.quality_flags.iter().map(|f| f.as_str()).collect();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO reminders
                 (user_id, channel_id, calendar_id, title, description, location,
                  due_date, reminder_time, priority, status, action_type, source,
                  original_message_id, llm_reasoning, llm_confidence, quality_flags,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'pending', ?10, ?11, ?12, ?13,
                     ?14, ?15, ?16, ?16)",
            rusqlite::params![
                reminder.user_id.as_str(),
                reminder.channel_id,
                reminder.calendar_id,
                reminder.title,
                reminder.description,
                reminder.location,
                reminder.due_date,
                reminder.reminder_time,
                reminder.priority.as_str(),
                reminder.action_type.as_str(),
                reminder.source.as_str(),
                reminder.original_message_id,
                reminder.llm_reasoning,
                reminder.llm_confidence,
                serde_json::to_string(&flags)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1"),
            [id],
            row_to_reminder,
        )
        .map_err(StoreError::from)
    }

    pub fn get_reminder(&self, user_id: &UserId, id: i64) -> Result<Reminder> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = ?1 AND user_id = ?2"
                ),
                rusqlite::params![id, user_id.as_str()],
                row_to_reminder,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn list_reminders(
        &self,
        user_id: &UserId,
        status: Option<ReminderStatus>,
        channel_id: Option<i64>,
    ) -> Result<Vec<Reminder>> {
        let conn = self.conn();
        let mut sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE user_id = :user");
        if status.is_some() {
            sql.push_str(" AND status = :status");
        }
        if channel_id.is_some() {
            sql.push_str(" AND channel_id = :channel");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<(&str, Box<dyn rusqlite::ToSql>)> =
            vec![(":user", Box::new(user_id.as_str().to_string()))];
        if let Some(s) = status {
            params.push((":status", Box::new(s.as_str().to_string())));
        }
        if let Some(c) = channel_id {
            params.push((":channel", Box::new(c)));
        }
        let param_refs: Vec<(&str, &dyn rusqlite::ToSql)> =
            params.iter().map(|(k, v)| (*k, v.as_ref())).collect();

        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn pending_reminders_for_channel(
        &self,
        user_id: &UserId,
        channel_id: i64,
    ) -> Result<Vec<Reminder>> {
        self.list_reminders(user_id, Some(ReminderStatus::Pending), Some(channel_id))
    }

    pub fn update_pending_reminder(
        &self,
        user_id: &UserId,
        id: i64,
        patch: ReminderPatch,
    ) -> Result<Reminder> {
        let current = self.get_reminder(user_id, id)?;
        if current.status != ReminderStatus::Pending {
            return Err(StoreError::InvalidState(format!(
                "reminder {} is {}, only pending rows can be edited",
                id, current.status
            )));
        }

        self.conn().execute(
            "UPDATE reminders
             SET title = ?1, description = ?2, location = ?3, due_date = ?4,
                 reminder_time = ?5, priority = ?6, updated_at = ?7
             WHERE id = ?8 AND user_id = ?9 AND status = 'pending'",
            rusqlite::params![
                patch.title.unwrap_or(current.title),
                patch.description.unwrap_or(current.description),
                patch.location.unwrap_or(current.location),
                patch.due_date.or(current.due_date),
                patch.reminder_time.or(current.reminder_time),
                patch.priority.unwrap_or(current.priority).as_str(),
                Utc::now().to_rfc3339(),
                id,
                user_id.as_str()
            ],
        )?;
        self.get_reminder(user_id, id)
    }

    pub fn confirm_reminder(&self, user_id: &UserId, id: i64) -> Result<Reminder> {
        self.transition_reminder(
            user_id,
            id,
            &[ReminderStatus::Pending],
            ReminderStatus::Confirmed,
        )
    }

    pub fn reject_reminder(&self, user_id: &UserId, id: i64) -> Result<Reminder> {
        self.transition_reminder(
            user_id,
            id,
            &[ReminderStatus::Pending],
            ReminderStatus::Rejected,
        )
    }

    /// Local-only terminal state; never touches the calendar provider.
    pub fn complete_reminder(&self, user_id: &UserId, id: i64) -> Result<Reminder> {
        self.transition_reminder(
            user_id,
            id,
            &[ReminderStatus::Confirmed, ReminderStatus::Synced],
            ReminderStatus::Completed,
        )
    }

    pub fn dismiss_reminder(&self, user_id: &UserId, id: i64) -> Result<Reminder> {
        self.transition_reminder(
            user_id,
            id,
            &[ReminderStatus::Confirmed, ReminderStatus::Synced],
            ReminderStatus::Dismissed,
        )
    }

    pub fn mark_reminder_synced(
        &self,
        user_id: &UserId,
        id: i64,
        external_event_id: &str,
    ) -> Result<Reminder> {
        let n = self.conn().execute(
            "UPDATE reminders
             SET status = 'synced', external_event_id = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4 AND status = 'confirmed'",
            rusqlite::params![external_event_id, Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            let current = self.get_reminder(user_id, id)?;
            return Err(StoreError::InvalidState(format!(
                "reminder {} is {}, expected confirmed",
                id, current.status
            )));
        }
        self.get_reminder(user_id, id)
    }

    pub fn add_reminder_quality_flag(
        &self,
        user_id: &UserId,
        id: i64,
        flag: QualityFlag,
    ) -> Result<()> {
        let current = self.get_reminder(user_id, id)?;
        let mut flags = current.quality_flags;
        if flags.iter().any(|f| f == flag.as_str()) {
            return Ok(());
        }
        flags.push(flag.as_str().to_string());
        self.conn().execute(
            "UPDATE reminders SET quality_flags = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            rusqlite::params![
                serde_json::to_string(&flags)?,
                Utc::now().to_rfc3339(),
                id,
                user_id.as_str()
            ],
        )?;
        Ok(())
    }

    /// Due scan: confirmed or synced, not yet notified, and past either the
    /// explicit reminder time or (absent one) the due date. Uses
    /// idx_reminders_due_scan.
    pub fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status IN ('confirmed', 'synced')
               AND due_notification_sent_at IS NULL
               AND (
                   (reminder_time IS NOT NULL AND reminder_time <= ?1)
                   OR (reminder_time IS NULL AND due_date IS NOT NULL AND due_date <= ?1)
               )"
        ))?;
        let rows = stmt
            .query_map([now.to_rfc3339()], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Atomically claim the due notification. Returns false when another
    /// tick already claimed it — the caller must then stay silent.
    pub fn claim_due_notification(&self, id: i64, now: DateTime<Utc>) -> Result<bool> {
        let n = self.conn().execute(
            "UPDATE reminders SET due_notification_sent_at = ?1, updated_at = ?1
             WHERE id = ?2 AND due_notification_sent_at IS NULL",
            rusqlite::params![now.to_rfc3339(), id],
        )?;
        Ok(n == 1)
    }

    pub fn confirmed_reminders(&self) -> Result<Vec<Reminder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders
             WHERE status = 'confirmed' ORDER BY updated_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn transition_reminder(
        &self,
        user_id: &UserId,
        id: i64,
        from: &[ReminderStatus],
        to: ReminderStatus,
    ) -> Result<Reminder> {
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let n = self.conn().execute(
            &format!(
                "UPDATE reminders SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4 AND status IN ({from_list})"
            ),
            rusqlite::params![to.as_str(), Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            let current = self.get_reminder(user_id, id)?;
            return Err(StoreError::InvalidState(format!(
                "reminder {} is {}, cannot move to {}",
                id, current.status, to
            )));
        }
        self.get_reminder(user_id, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::ChannelType;
    use chrono::Duration;

    fn seed(store: &Store, pid: &str) -> (UserId, i64) {
        let uid = store
            .upsert_user(pid, &format!("{pid}@x.y"), pid)
            .unwrap()
            .id;
        let (channel, _) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();
        (uid, channel.id)
    }

    fn new_reminder(uid: &UserId, channel_id: i64, due_in: Option<Duration>) -> NewReminder {
        NewReminder {
            user_id: uid.clone(),
            channel_id,
            calendar_id: "primary".into(),
            title: "Pay rent".into(),
            description: "Monthly transfer".into(),
            location: String::new(),
            due_date: due_in.map(|d| (Utc::now() + d).to_rfc3339()),
            reminder_time: None,
            priority: Priority::Normal,
            action_type: ActionType::Create,
            source: Source::Whatsapp,
            original_message_id: None,
            llm_reasoning: String::new(),
            llm_confidence: 0.8,
            quality_flags: vec![],
        }
    }

    #[test]
    fn description_only_reminder_is_allowed() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let reminder = store
            .insert_reminder(new_reminder(&uid, channel_id, None))
            .unwrap();
        assert!(reminder.due_date.is_none());
        assert_eq!(reminder.status, ReminderStatus::Pending);
    }

    #[test]
    fn complete_from_confirmed_and_synced() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");

        let r1 = store
            .insert_reminder(new_reminder(&uid, channel_id, None))
            .unwrap();
        store.confirm_reminder(&uid, r1.id).unwrap();
        assert_eq!(
            store.complete_reminder(&uid, r1.id).unwrap().status,
            ReminderStatus::Completed
        );

        let r2 = store
            .insert_reminder(new_reminder(&uid, channel_id, None))
            .unwrap();
        store.confirm_reminder(&uid, r2.id).unwrap();
        store.mark_reminder_synced(&uid, r2.id, "evt_r2").unwrap();
        assert_eq!(
            store.complete_reminder(&uid, r2.id).unwrap().status,
            ReminderStatus::Completed
        );
    }

    #[test]
    fn complete_from_pending_is_validation() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let reminder = store
            .insert_reminder(new_reminder(&uid, channel_id, None))
            .unwrap();
        assert!(matches!(
            store.complete_reminder(&uid, reminder.id),
            Err(StoreError::InvalidState(_))
        ));
    }

    #[test]
    fn due_scan_and_atomic_claim() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let reminder = store
            .insert_reminder(new_reminder(&uid, channel_id, Some(Duration::seconds(-60))))
            .unwrap();

        // pending rows are never due
        assert!(store.due_reminders(Utc::now()).unwrap().is_empty());

        store.confirm_reminder(&uid, reminder.id).unwrap();
        let due = store.due_reminders(Utc::now()).unwrap();
        assert_eq!(due.len(), 1);

        assert!(store.claim_due_notification(reminder.id, Utc::now()).unwrap());
        // second claim loses
        assert!(!store.claim_due_notification(reminder.id, Utc::now()).unwrap());
        assert!(store.due_reminders(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn reminder_time_takes_precedence_over_due_date() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let mut new = new_reminder(&uid, channel_id, Some(Duration::seconds(-60)));
        // explicit reminder_time in the future suppresses the past due_date
        new.reminder_time = Some((Utc::now() + Duration::hours(1)).to_rfc3339());
        let reminder = store.insert_reminder(new).unwrap();
        store.confirm_reminder(&uid, reminder.id).unwrap();
        assert!(store.due_reminders(Utc::now()).unwrap().is_empty());
    }
}
