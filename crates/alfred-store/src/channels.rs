use alfred_core::types::{BackfillStatus, ChannelType, Source, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SourceChannel {
    pub id: i64,
    pub user_id: UserId,
    pub source: Source,
    pub channel_type: ChannelType,
    pub identifier: String,
    pub name: String,
    pub enabled: bool,
    pub total_message_count: i64,
    pub last_message_at: Option<String>,
    pub initial_backfill_status: BackfillStatus,
    pub initial_backfill_at: Option<String>,
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceChannel> {
    use std::str::FromStr;
    let source: String = row.get(2)?;
    let channel_type: String = row.get(3)?;
    let backfill: String = row.get(9)?;
    Ok(SourceChannel {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        source: Source::from_str(&source).unwrap_or(Source::Whatsapp),
        channel_type: ChannelType::from_str(&channel_type).unwrap_or(ChannelType::Sender),
        identifier: row.get(4)?,
        name: row.get(5)?,
        enabled: row.get::<_, i64>(6)? != 0,
        total_message_count: row.get(7)?,
        last_message_at: row.get(8)?,
        initial_backfill_status: BackfillStatus::from_str(&backfill).unwrap_or_default(),
        initial_backfill_at: row.get(10)?,
    })
}

const CHANNEL_COLUMNS: &str = "id, user_id, source_type, channel_type, identifier, name, \
     enabled, total_message_count, last_message_at, initial_backfill_status, initial_backfill_at";

impl Store {
    /// Look up a channel by identifier, creating it **disabled** when it is
    /// first observed. Returns `(channel, created)`.
    pub fn get_or_create_channel(
        &self,
        user_id: &UserId,
        source: Source,
        channel_type: ChannelType,
        identifier: &str,
        name: &str,
    ) -> Result<(SourceChannel, bool)> {
        let conn = self.conn();
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM source_channels
                     WHERE user_id = ?1 AND source_type = ?2 AND identifier = ?3"
                ),
                rusqlite::params![user_id.as_str(), source.as_str(), identifier],
                row_to_channel,
            )
            .ok();
        if let Some(channel) = existing {
            return Ok((channel, false));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO source_channels
                 (user_id, source_type, channel_type, identifier, name, enabled,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            rusqlite::params![
                user_id.as_str(),
                source.as_str(),
                channel_type.as_str(),
                identifier,
                name,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        let channel = conn.query_row(
            &format!("SELECT {CHANNEL_COLUMNS} FROM source_channels WHERE id = ?1"),
            [id],
            row_to_channel,
        )?;
        Ok((channel, true))
    }

    /// Explicit creation from the API; unlike discovery this enables the
    /// channel immediately.
    pub fn create_channel(
        &self,
        user_id: &UserId,
        source: Source,
        channel_type: ChannelType,
        identifier: &str,
        name: &str,
    ) -> Result<SourceChannel> {
        let (channel, created) =
            self.get_or_create_channel(user_id, source, channel_type, identifier, name)?;
        if !created && channel.enabled {
            return Ok(channel);
        }
        self.set_channel_enabled(user_id, channel.id, true)?;
        self.get_channel(user_id, channel.id)
    }

    pub fn get_channel(&self, user_id: &UserId, id: i64) -> Result<SourceChannel> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM source_channels
                     WHERE id = ?1 AND user_id = ?2"
                ),
                rusqlite::params![id, user_id.as_str()],
                row_to_channel,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn list_channels(
        &self,
        user_id: &UserId,
        source: Option<Source>,
        enabled_only: bool,
    ) -> Result<Vec<SourceChannel>> {
        let conn = self.conn();
        let mut sql = format!(
            "SELECT {CHANNEL_COLUMNS} FROM source_channels WHERE user_id = ?1"
        );
        if source.is_some() {
            sql.push_str(" AND source_type = ?2");
        }
        if enabled_only {
            sql.push_str(" AND enabled = 1");
        }
        sql.push_str(" ORDER BY total_message_count DESC, name");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match source {
            Some(s) => stmt.query_map(
                rusqlite::params![user_id.as_str(), s.as_str()],
                row_to_channel,
            )?,
            None => stmt.query_map([user_id.as_str()], row_to_channel)?,
        }
        .filter_map(|r| r.ok())
        .collect();
        Ok(rows)
    }

    /// Channels observed by discovery but not yet enabled, ranked by
    /// activity so the UI can show the most relevant first.
    pub fn list_discoverable_channels(
        &self,
        user_id: &UserId,
        source: Source,
    ) -> Result<Vec<SourceChannel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM source_channels
             WHERE user_id = ?1 AND source_type = ?2 AND enabled = 0
             ORDER BY total_message_count DESC, last_message_at DESC"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![user_id.as_str(), source.as_str()],
                row_to_channel,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn set_channel_enabled(&self, user_id: &UserId, id: i64, enabled: bool) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE source_channels SET enabled = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            rusqlite::params![enabled as i64, Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn rename_channel(&self, user_id: &UserId, id: i64, name: &str) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE source_channels SET name = ?1, updated_at = ?2
             WHERE id = ?3 AND user_id = ?4",
            rusqlite::params![name, Utc::now().to_rfc3339(), id, user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete_channel(&self, user_id: &UserId, id: i64) -> Result<()> {
        let n = self.conn().execute(
            "DELETE FROM source_channels WHERE id = ?1 AND user_id = ?2",
            rusqlite::params![id, user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Per-message bookkeeping on the live ingest path. The count only
    /// ever grows.
    pub fn record_channel_message(&self, channel_id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE source_channels
             SET total_message_count = total_message_count + 1,
                 last_message_at = MAX(COALESCE(last_message_at, ''), ?1),
                 updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![at.to_rfc3339(), Utc::now().to_rfc3339(), channel_id],
        )?;
        Ok(())
    }

    /// History-sync bulk write. Monotone: an older snapshot can never
    /// shrink the count below what live ingestion already recorded.
    pub fn set_channel_stats(
        &self,
        channel_id: i64,
        total_message_count: i64,
        last_message_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE source_channels
             SET total_message_count = MAX(total_message_count, ?1),
                 last_message_at = MAX(COALESCE(last_message_at, ''), COALESCE(?2, '')),
                 updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![
                total_message_count,
                last_message_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                channel_id
            ],
        )?;
        Ok(())
    }

    pub fn set_backfill_status(&self, channel_id: i64, status: BackfillStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let stamp = matches!(status, BackfillStatus::Done | BackfillStatus::Failed);
        self.conn().execute(
            "UPDATE source_channels
             SET initial_backfill_status = ?1,
                 initial_backfill_at = CASE WHEN ?2 THEN ?3 ELSE initial_backfill_at END,
                 updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![status.as_str(), stamp, now, channel_id],
        )?;
        Ok(())
    }

    /// Opportunistic display-name refresh; blank names never overwrite.
    pub fn refresh_channel_name(&self, channel_id: i64, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        self.conn().execute(
            "UPDATE source_channels SET name = ?1, updated_at = ?2
             WHERE id = ?3 AND name != ?1",
            rusqlite::params![name, Utc::now().to_rfc3339(), channel_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(store: &Store, pid: &str) -> UserId {
        store
            .upsert_user(pid, &format!("{pid}@x.y"), pid)
            .unwrap()
            .id
    }

    #[test]
    fn discovery_creates_disabled_once() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store, "p-1");
        let (c1, created) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+4917", "Ada")
            .unwrap();
        assert!(created);
        assert!(!c1.enabled);

        let (c2, created2) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+4917", "Ada")
            .unwrap();
        assert!(!created2);
        assert_eq!(c1.id, c2.id);
    }

    #[test]
    fn identical_identifiers_do_not_conflict_across_users() {
        let store = Store::open_in_memory().unwrap();
        let a = user(&store, "p-a");
        let b = user(&store, "p-b");
        let (ca, _) = store
            .get_or_create_channel(&a, Source::Whatsapp, ChannelType::Sender, "+1000", "X")
            .unwrap();
        let (cb, _) = store
            .get_or_create_channel(&b, Source::Whatsapp, ChannelType::Sender, "+1000", "X")
            .unwrap();
        assert_ne!(ca.id, cb.id);
    }

    #[test]
    fn ownership_mismatch_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let a = user(&store, "p-a");
        let b = user(&store, "p-b");
        let (ca, _) = store
            .get_or_create_channel(&a, Source::Telegram, ChannelType::Sender, "42", "T")
            .unwrap();
        assert!(matches!(
            store.get_channel(&b, ca.id),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.set_channel_enabled(&b, ca.id, true),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn counts_are_monotone() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store, "p-1");
        let (channel, _) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();

        store.record_channel_message(channel.id, Utc::now()).unwrap();
        store.record_channel_message(channel.id, Utc::now()).unwrap();
        store.set_channel_stats(channel.id, 1, None).unwrap();

        let after = store.get_channel(&uid, channel.id).unwrap();
        // history snapshot of 1 cannot shrink the live count of 2
        assert_eq!(after.total_message_count, 2);

        store.set_channel_stats(channel.id, 40, None).unwrap();
        assert_eq!(
            store.get_channel(&uid, channel.id).unwrap().total_message_count,
            40
        );
    }

    #[test]
    fn explicit_create_enables() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store, "p-1");
        let channel = store
            .create_channel(&uid, Source::Gmail, ChannelType::Domain, "acme.com", "ACME")
            .unwrap();
        assert!(channel.enabled);
    }
}
