//! Calendar-event proposals and their status machine.
//!
//! Transitions are guarded in the UPDATE's WHERE clause, so a racing
//! writer can never skip a state. `external_event_id` is written in the
//! same statement that moves a row to `synced` — the coupling invariant
//! holds at every committed state.

use alfred_core::types::{ActionType, EventStatus, QualityFlag, UserId};
use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub id: i64,
    pub user_id: UserId,
    pub channel_id: i64,
    pub external_event_id: Option<String>,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    /// RFC 3339 with the user's offset preserved.
    pub start_time: String,
    pub end_time: Option<String>,
    pub location: String,
    pub status: EventStatus,
    pub action_type: ActionType,
    pub original_message_id: Option<i64>,
    pub llm_reasoning: String,
    pub llm_confidence: f64,
    pub quality_flags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Insert payload for a fresh proposal (always lands `pending`).
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub user_id: UserId,
    pub channel_id: i64,
    pub calendar_id: String,
    pub title: String,
    pub description: String,
    pub start_time: String,
    pub end_time: Option<String>,
    pub location: String,
    pub action_type: ActionType,
    pub original_message_id: Option<i64>,
    pub llm_reasoning: String,
    pub llm_confidence: f64,
    pub quality_flags: Vec<QualityFlag>,
}

/// Field overwrite set for in-place updates; `None` keeps the prior value.
#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<CalendarEvent> {
    use std::str::FromStr;
    let status: String = row.get(10)?;
    let action: String = row.get(11)?;
    let flags_json: String = row.get(15)?;
    Ok(CalendarEvent {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        channel_id: row.get(2)?,
        external_event_id: row.get(3)?,
        calendar_id: row.get(4)?,
        title: row.get(5)?,
        description: row.get(6)?,
        start_time: row.get(7)?,
        end_time: row.get(8)?,
        location: row.get(9)?,
        status: EventStatus::from_str(&status).unwrap_or(EventStatus::Pending),
        action_type: ActionType::from_str(&action).unwrap_or(ActionType::Create),
        original_message_id: row.get(12)?,
        llm_reasoning: row.get(13)?,
        llm_confidence: row.get(14)?,
        quality_flags: serde_json::from_str(&flags_json).unwrap_or_default(),
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

const EVENT_COLUMNS: &str = "id, user_id, channel_id, external_event_id, calendar_id, title, \
     description, start_time, end_time, location, status, action_type, original_message_id, \
     llm_reasoning, llm_confidence, quality_flags, created_at, updated_at";

impl Store {
    pub fn insert_event(&self, event: NewEvent) -> Result<CalendarEvent> {
        let flags: Vec<&str> = event.quality_flags.iter().map(|f| f.as_str()).collect();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO calendar_events
                 (user_id, channel_id, calendar_id, title, description, start_time,
                  end_time, location, status, action_type, original_message_id,
                  llm_reasoning, llm_confidence, quality_flags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
            rusqlite::params![
                event.user_id.as_str(),
                event.channel_id,
                event.calendar_id,
                event.title,
                event.description,
                event.start_time,
                event.end_time,
                event.location,
                event.action_type.as_str(),
                event.original_message_id,
                event.llm_reasoning,
                event.llm_confidence,
                serde_json::to_string(&flags)?,
                Utc::now().to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1"),
            [id],
            row_to_event,
        )
        .map_err(StoreError::from)
    }

    pub fn get_event(&self, user_id: &UserId, id: i64) -> Result<CalendarEvent> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM calendar_events
                     WHERE id = ?1 AND user_id = ?2"
                ),
                rusqlite::params![id, user_id.as_str()],
                row_to_event,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn list_events(
        &self,
        user_id: &UserId,
        status: Option<EventStatus>,
        channel_id: Option<i64>,
    ) -> Result<Vec<CalendarEvent>> {
        let conn = self.conn();
        let mut sql =
            format!("SELECT {EVENT_COLUMNS} FROM calendar_events WHERE user_id = :user");
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
            .query_map(param_refs.as_slice(), row_to_event)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Open proposals the prompt builder lists so the model can reference
    /// them for updates and deletes.
    pub fn pending_events_for_channel(
        &self,
        user_id: &UserId,
        channel_id: i64,
    ) -> Result<Vec<CalendarEvent>> {
        self.list_events(user_id, Some(EventStatus::Pending), Some(channel_id))
    }

    /// In-place field overwrite, allowed only while `pending`.
    pub fn update_pending_event(
        &self,
        user_id: &UserId,
        id: i64,
        patch: EventPatch,
    ) -> Result<CalendarEvent> {
        let current = self.get_event(user_id, id)?;
        if current.status != EventStatus::Pending {
            return Err(StoreError::InvalidState(format!(
                "event {} is {}, only pending rows can be edited",
                id, current.status
            )));
        }

        self.conn().execute(
            "UPDATE calendar_events
             SET title = ?1, description = ?2, start_time = ?3, end_time = ?4,
                 location = ?5, updated_at = ?6
             WHERE id = ?7 AND user_id = ?8 AND status = 'pending'",
            rusqlite::params![
                patch.title.unwrap_or(current.title),
                patch.description.unwrap_or(current.description),
                patch.start_time.unwrap_or(current.start_time),
                patch.end_time.or(current.end_time),
                patch.location.unwrap_or(current.location),
                Utc::now().to_rfc3339(),
                id,
                user_id.as_str()
            ],
        )?;
        self.get_event(user_id, id)
    }

    pub fn confirm_event(&self, user_id: &UserId, id: i64) -> Result<CalendarEvent> {
        self.transition_event(user_id, id, &[EventStatus::Pending], EventStatus::Confirmed)
    }

    pub fn reject_event(&self, user_id: &UserId, id: i64) -> Result<CalendarEvent> {
        self.transition_event(user_id, id, &[EventStatus::Pending], EventStatus::Rejected)
    }

    /// Sync success for `create`/`update`: set the external id and move to
    /// `synced` in one statement.
    pub fn mark_event_synced(
        &self,
        user_id: &UserId,
        id: i64,
        external_event_id: &str,
    ) -> Result<CalendarEvent> {
        let n = self.conn().execute(
            "UPDATE calendar_events
             SET status = 'synced', external_event_id = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4 AND status = 'confirmed'",
            rusqlite::params![external_event_id, Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            return self.classify_transition_failure(user_id, id, EventStatus::Confirmed);
        }
        self.get_event(user_id, id)
    }

    /// Sync success for `delete`: the provider item is gone, tombstone the
    /// local row.
    pub fn mark_event_deleted(&self, user_id: &UserId, id: i64) -> Result<CalendarEvent> {
        self.transition_event(
            user_id,
            id,
            &[EventStatus::Confirmed, EventStatus::Synced],
            EventStatus::Deleted,
        )
    }

    pub fn add_event_quality_flag(
        &self,
        user_id: &UserId,
        id: i64,
        flag: QualityFlag,
    ) -> Result<()> {
        let current = self.get_event(user_id, id)?;
        let mut flags = current.quality_flags;
        if flags.iter().any(|f| f == flag.as_str()) {
            return Ok(());
        }
        flags.push(flag.as_str().to_string());
        self.conn().execute(
            "UPDATE calendar_events SET quality_flags = ?1, updated_at = ?2
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

    /// All confirmed events, for the retry sweeper.
    pub fn confirmed_events(&self) -> Result<Vec<CalendarEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE status = 'confirmed' ORDER BY updated_at"
        ))?;
        let rows = stmt
            .query_map([], row_to_event)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    fn transition_event(
        &self,
        user_id: &UserId,
        id: i64,
        from: &[EventStatus],
        to: EventStatus,
    ) -> Result<CalendarEvent> {
        let from_list = from
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let n = self.conn().execute(
            &format!(
                "UPDATE calendar_events SET status = ?1, updated_at = ?2
                 WHERE id = ?3 AND user_id = ?4 AND status IN ({from_list})"
            ),
            rusqlite::params![to.as_str(), Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            return self.classify_transition_failure(user_id, id, from[0]);
        }
        self.get_event(user_id, id)
    }

    /// Zero rows updated: either the row isn't visible to this user
    /// (NotFound) or it is in the wrong state (Validation).
    fn classify_transition_failure(
        &self,
        user_id: &UserId,
        id: i64,
        expected: EventStatus,
    ) -> Result<CalendarEvent> {
        let current = self.get_event(user_id, id)?;
        Err(StoreError::InvalidState(format!(
            "event {} is {}, expected {}",
            id, current.status, expected
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::{ChannelType, Source};

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

    fn new_event(uid: &UserId, channel_id: i64) -> NewEvent {
        NewEvent {
            user_id: uid.clone(),
            channel_id,
            calendar_id: "primary".into(),
            title: "Dinner".into(),
            description: String::new(),
            start_time: "2026-02-09T19:00:00+01:00".into(),
            end_time: None,
            location: "Luigi's".into(),
            action_type: ActionType::Create,
            original_message_id: None,
            llm_reasoning: "explicit time".into(),
            llm_confidence: 0.9,
            quality_flags: vec![],
        }
    }

    #[test]
    fn happy_path_follows_the_dag() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let event = store.insert_event(new_event(&uid, channel_id)).unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert!(event.external_event_id.is_none());

        let confirmed = store.confirm_event(&uid, event.id).unwrap();
        assert_eq!(confirmed.status, EventStatus::Confirmed);

        let synced = store.mark_event_synced(&uid, event.id, "evt_abc").unwrap();
        assert_eq!(synced.status, EventStatus::Synced);
        assert_eq!(synced.external_event_id.as_deref(), Some("evt_abc"));
    }

    #[test]
    fn confirm_of_non_pending_is_validation() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let event = store.insert_event(new_event(&uid, channel_id)).unwrap();
        store.confirm_event(&uid, event.id).unwrap();
        assert!(matches!(
            store.confirm_event(&uid, event.id),
            Err(StoreError::InvalidState(_))
        ));
    }

    #[test]
    fn synced_requires_confirmed_first() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let event = store.insert_event(new_event(&uid, channel_id)).unwrap();
        assert!(matches!(
            store.mark_event_synced(&uid, event.id, "evt_x"),
            Err(StoreError::InvalidState(_))
        ));
        // the failed attempt must not have leaked an external id
        let row = store.get_event(&uid, event.id).unwrap();
        assert_eq!(row.status, EventStatus::Pending);
        assert!(row.external_event_id.is_none());
    }

    #[test]
    fn cross_user_access_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let (a, channel_a) = seed(&store, "p-a");
        let (b, _) = seed(&store, "p-b");
        let event = store.insert_event(new_event(&a, channel_a)).unwrap();

        assert!(matches!(
            store.get_event(&b, event.id),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.confirm_event(&b, event.id),
            Err(StoreError::NotFound)
        ));
        assert!(store.list_events(&b, None, None).unwrap().is_empty());
    }

    #[test]
    fn update_only_while_pending() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let event = store.insert_event(new_event(&uid, channel_id)).unwrap();

        let patch = EventPatch {
            start_time: Some("2026-02-09T20:00:00+01:00".into()),
            ..Default::default()
        };
        let updated = store.update_pending_event(&uid, event.id, patch).unwrap();
        assert_eq!(updated.start_time, "2026-02-09T20:00:00+01:00");
        assert_eq!(updated.title, "Dinner");
        assert_eq!(updated.action_type, ActionType::Create);

        store.confirm_event(&uid, event.id).unwrap();
        assert!(matches!(
            store.update_pending_event(&uid, event.id, EventPatch::default()),
            Err(StoreError::InvalidState(_))
        ));
    }

    #[test]
    fn quality_flags_accumulate_without_duplicates() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store, "p-1");
        let event = store.insert_event(new_event(&uid, channel_id)).unwrap();
        store
            .add_event_quality_flag(&uid, event.id, QualityFlag::SyncError)
            .unwrap();
        store
            .add_event_quality_flag(&uid, event.id, QualityFlag::SyncError)
            .unwrap();
        let row = store.get_event(&uid, event.id).unwrap();
        assert_eq!(row.quality_flags, vec!["sync_error"]);
    }
}
