//! The `processed_emails` dedup set behind Gmail's at-most-once promise.
//!
//! Marking is deferred until after a successful terminal parse, so a
//! crashed or failed analysis leaves the email eligible for the next poll.

use alfred_core::types::UserId;
use chrono::Utc;

use crate::error::Result;
use crate::store::Store;

impl Store {
    pub fn is_email_processed(&self, user_id: &UserId, email_id: &str) -> Result<bool> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM processed_emails WHERE user_id = ?1 AND email_id = ?2",
            rusqlite::params![user_id.as_str(), email_id],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Returns false when the email was already marked (lost the race).
    pub fn mark_email_processed(&self, user_id: &UserId, email_id: &str) -> Result<bool> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO processed_emails (user_id, email_id, processed_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id.as_str(), email_id, Utc::now().to_rfc3339()],
        )?;
        Ok(n == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_is_idempotent_and_user_scoped() {
        let store = Store::open_in_memory().unwrap();
        let a = store.upsert_user("p-a", "a@x.y", "A").unwrap().id;
        let b = store.upsert_user("p-b", "b@x.y", "B").unwrap().id;

        assert!(!store.is_email_processed(&a, "msg-1").unwrap());
        assert!(store.mark_email_processed(&a, "msg-1").unwrap());
        assert!(!store.mark_email_processed(&a, "msg-1").unwrap());
        assert!(store.is_email_processed(&a, "msg-1").unwrap());

        // same provider id for a different user is a different key
        assert!(!store.is_email_processed(&b, "msg-1").unwrap());
        assert!(store.mark_email_processed(&b, "msg-1").unwrap());
    }
}
