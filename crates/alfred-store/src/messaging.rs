//! Lightweight per-user messaging-session rows. The heavy protocol blob
//! lives in the sidecar store, not here.

use alfred_core::types::{Source, UserId};
use chrono::Utc;
use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct MessagingSession {
    pub user_id: UserId,
    pub source: Source,
    pub phone_number: Option<String>,
    pub connected: bool,
    pub last_connected_at: Option<String>,
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessagingSession> {
    use std::str::FromStr;
    let source_str: String = row.get(1)?;
    Ok(MessagingSession {
        user_id: UserId::from(row.get::<_, String>(0)?),
        source: Source::from_str(&source_str).unwrap_or(Source::Whatsapp),
        phone_number: row.get(2)?,
        connected: row.get::<_, i64>(3)? != 0,
        last_connected_at: row.get(4)?,
    })
}

const SESSION_COLUMNS: &str =
    "user_id, source_type, phone_number, connected, last_connected_at";

impl Store {
    pub fn upsert_messaging_session(
        &self,
        user_id: &UserId,
        source: Source,
        phone_number: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO messaging_sessions
                 (user_id, source_type, phone_number, connected, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)
             ON CONFLICT(user_id, source_type) DO UPDATE SET
                 phone_number = COALESCE(excluded.phone_number, phone_number),
                 updated_at = excluded.updated_at",
            rusqlite::params![user_id.as_str(), source.as_str(), phone_number, now],
        )?;
        Ok(())
    }

    pub fn set_messaging_connected(
        &self,
        user_id: &UserId,
        source: Source,
        connected: bool,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "UPDATE messaging_sessions
             SET connected = ?1,
                 last_connected_at = CASE WHEN ?1 = 1 THEN ?2 ELSE last_connected_at END,
                 updated_at = ?2
             WHERE user_id = ?3 AND source_type = ?4",
            rusqlite::params![connected as i64, now, user_id.as_str(), source.as_str()],
        )?;
        Ok(())
    }

    pub fn get_messaging_session(
        &self,
        user_id: &UserId,
        source: Source,
    ) -> Result<Option<MessagingSession>> {
        let session = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM messaging_sessions
                     WHERE user_id = ?1 AND source_type = ?2"
                ),
                rusqlite::params![user_id.as_str(), source.as_str()],
                row_to_session,
            )
            .ok();
        Ok(session)
    }

    /// All sessions flagged connected — the restore set at startup.
    pub fn connected_messaging_sessions(&self) -> Result<Vec<MessagingSession>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM messaging_sessions WHERE connected = 1"
        ))?;
        let sessions = stmt
            .query_map([], row_to_session)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(sessions)
    }

    pub fn delete_messaging_session(&self, user_id: &UserId, source: Source) -> Result<()> {
        self.conn().execute(
            "DELETE FROM messaging_sessions WHERE user_id = ?1 AND source_type = ?2",
            rusqlite::params![user_id.as_str(), source.as_str()],
        )?;
        Ok(())
    }

    /// Any evidence of prior state that should restart workers on login.
    pub fn user_has_prior_state(&self, user_id: &UserId) -> Result<bool> {
        let connected: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messaging_sessions WHERE user_id = ?1 AND connected = 1",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        if connected > 0 {
            return Ok(true);
        }
        let tokens: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM provider_tokens WHERE user_id = ?1 AND invalid = 0",
            [user_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(tokens > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(store: &Store) -> UserId {
        store.upsert_user("p-1", "a@b.c", "A").unwrap().id
    }

    #[test]
    fn connect_flag_and_restore_set() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        store
            .upsert_messaging_session(&uid, Source::Whatsapp, Some("+4917000"))
            .unwrap();
        assert!(store.connected_messaging_sessions().unwrap().is_empty());

        store
            .set_messaging_connected(&uid, Source::Whatsapp, true)
            .unwrap();
        let restored = store.connected_messaging_sessions().unwrap();
        assert_eq!(restored.len(), 1);
        assert!(restored[0].last_connected_at.is_some());

        store
            .set_messaging_connected(&uid, Source::Whatsapp, false)
            .unwrap();
        let session = store
            .get_messaging_session(&uid, Source::Whatsapp)
            .unwrap()
            .unwrap();
        assert!(!session.connected);
        // disconnect keeps the last-connected stamp
        assert!(session.last_connected_at.is_some());
    }

    #[test]
    fn prior_state_detects_connected_session_or_token() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        assert!(!store.user_has_prior_state(&uid).unwrap());

        store
            .upsert_messaging_session(&uid, Source::Telegram, None)
            .unwrap();
        store
            .set_messaging_connected(&uid, Source::Telegram, true)
            .unwrap();
        assert!(store.user_has_prior_state(&uid).unwrap());
    }
}
