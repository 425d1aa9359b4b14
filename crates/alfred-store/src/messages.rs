use alfred_core::types::{Source, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct SourceMessage {
    pub id: i64,
    pub user_id: UserId,
    pub channel_id: i64,
    pub source: Source,
    pub sender_id: String,
    pub sender_name: String,
    pub subject: Option<String>,
    pub text: String,
    pub timestamp: String,
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceMessage> {
    use std::str::FromStr;
    let source: String = row.get(3)?;
    Ok(SourceMessage {
        id: row.get(0)?,
        user_id: UserId::from(row.get::<_, String>(1)?),
        channel_id: row.get(2)?,
        source: Source::from_str(&source).unwrap_or(Source::Whatsapp),
        sender_id: row.get(4)?,
        sender_name: row.get(5)?,
        subject: row.get(6)?,
        text: row.get(7)?,
        timestamp: row.get(8)?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, user_id, channel_id, source_type, sender_id, sender_name, subject, text, timestamp";

impl Store {
    /// Append one message. Pruning is the caller's job (`prune_channel_messages`)
    /// so history sync can batch inserts before trimming once.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_message(
        &self,
        user_id: &UserId,
        channel_id: i64,
        source: Source,
        sender_id: &str,
        sender_name: &str,
        subject: Option<&str>,
        text: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO source_messages
                 (user_id, channel_id, source_type, sender_id, sender_name, subject,
                  text, timestamp, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                user_id.as_str(),
                channel_id,
                source.as_str(),
                sender_id,
                sender_name,
                subject,
                text,
                timestamp.to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Keep only the `keep` most recent rows for a channel.
    pub fn prune_channel_messages(&self, channel_id: i64, keep: usize) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM source_messages
             WHERE channel_id = ?1 AND id NOT IN (
                 SELECT id FROM source_messages
                 WHERE channel_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2
             )",
            rusqlite::params![channel_id, keep as i64],
        )?;
        Ok(n)
    }

    /// Recent history for the prompt builder, oldest first.
    pub fn recent_messages(&self, channel_id: i64, limit: usize) -> Result<Vec<SourceMessage>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT {MESSAGE_COLUMNS} FROM source_messages
                 WHERE channel_id = ?1
                 ORDER BY timestamp DESC, id DESC
                 LIMIT ?2
             ) ORDER BY timestamp ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![channel_id, limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alfred_core::types::ChannelType;
    use chrono::Duration;

    fn seed(store: &Store) -> (UserId, i64) {
        let uid = store.upsert_user("p-1", "a@b.c", "A").unwrap().id;
        let (channel, _) = store
            .get_or_create_channel(&uid, Source::Whatsapp, ChannelType::Sender, "+1", "A")
            .unwrap();
        (uid, channel.id)
    }

    #[test]
    fn prune_keeps_most_recent() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store);
        let base = Utc::now();
        for i in 0..30 {
            store
                .insert_message(
                    &uid,
                    channel_id,
                    Source::Whatsapp,
                    "+1",
                    "A",
                    None,
                    &format!("msg {i}"),
                    base + Duration::seconds(i),
                )
                .unwrap();
        }
        let pruned = store.prune_channel_messages(channel_id, 25).unwrap();
        assert_eq!(pruned, 5);

        let recent = store.recent_messages(channel_id, 100).unwrap();
        assert_eq!(recent.len(), 25);
        assert_eq!(recent.first().unwrap().text, "msg 5");
        assert_eq!(recent.last().unwrap().text, "msg 29");
    }

    #[test]
    fn recent_is_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store);
        let base = Utc::now();
        for i in 0..3 {
            store
                .insert_message(
                    &uid,
                    channel_id,
                    Source::Whatsapp,
                    "+1",
                    "A",
                    None,
                    &format!("m{i}"),
                    base + Duration::seconds(i),
                )
                .unwrap();
        }
        let texts: Vec<_> = store
            .recent_messages(channel_id, 2)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    #[test]
    fn channel_deletion_leaves_messages_behind() {
        let store = Store::open_in_memory().unwrap();
        let (uid, channel_id) = seed(&store);
        store
            .insert_message(
                &uid,
                channel_id,
                Source::Whatsapp,
                "+1",
                "A",
                None,
                "keep me",
                Utc::now(),
            )
            .unwrap();
        store.delete_channel(&uid, channel_id).unwrap();
        let remaining = store.recent_messages(channel_id, 10).unwrap();
        assert_eq!(remaining.len(), 1);
    }
}
