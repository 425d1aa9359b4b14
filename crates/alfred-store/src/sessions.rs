//! Bearer sessions for the mobile client.
//!
//! The opaque token is a random UUID returned to the caller exactly once;
//! only its SHA-256 hex digest is stored.

use alfred_core::types::UserId;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct UserSession {
    pub id: String,
    pub user_id: UserId,
    pub expires_at: String,
    pub device_tag: Option<String>,
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

impl Store {
    /// Issue a new session. Returns the plaintext bearer token — the only
    /// time it is ever visible.
    pub fn create_session(
        &self,
        user_id: &UserId,
        ttl: Duration,
        device_tag: Option<&str>,
    ) -> Result<(UserSession, String)> {
        let token = Uuid::new_v4().to_string();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at = (now + ttl).to_rfc3339();

        self.conn().execute(
            "INSERT INTO user_sessions (id, token_hash, user_id, expires_at, device_tag, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                id,
                hash_token(&token),
                user_id.as_str(),
                expires_at,
                device_tag,
                now.to_rfc3339()
            ],
        )?;

        let session = UserSession {
            id,
            user_id: user_id.clone(),
            expires_at,
            device_tag: device_tag.map(String::from),
        };
        Ok((session, token))
    }

    /// Resolve a bearer token to its user. Expired or unknown tokens
    /// resolve to `NotFound`; the auth layer maps that to 401.
    pub fn authenticate(&self, token: &str) -> Result<UserId> {
        let row: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT user_id, expires_at FROM user_sessions WHERE token_hash = ?1",
                [hash_token(token)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();

        let (user_id, expires_at) = row.ok_or(StoreError::NotFound)?;
        let expiry = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|e| StoreError::InvalidState(format!("bad expiry: {e}")))?;
        if expiry < Utc::now() {
            return Err(StoreError::NotFound);
        }
        Ok(UserId::from(user_id))
    }

    /// Logout: delete the session behind this token.
    pub fn delete_session(&self, token: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM user_sessions WHERE token_hash = ?1",
            [hash_token(token)],
        )?;
        Ok(())
    }

    /// Reset: drop every session the user holds.
    pub fn delete_sessions_for_user(&self, user_id: &UserId) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM user_sessions WHERE user_id = ?1",
            [user_id.as_str()],
        )?;
        Ok(n)
    }

    /// Housekeeping at startup.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM user_sessions WHERE expires_at < ?1",
            [Utc::now().to_rfc3339()],
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(store: &Store) -> UserId {
        store.upsert_user("p-1", "a@b.c", "A").unwrap().id
    }

    #[test]
    fn token_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        let (_, token) = store
            .create_session(&uid, Duration::days(30), Some("pixel-8"))
            .unwrap();
        assert_eq!(store.authenticate(&token).unwrap(), uid);
    }

    #[test]
    fn plaintext_token_is_not_stored() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        let (_, token) = store.create_session(&uid, Duration::days(1), None).unwrap();
        let stored: String = store
            .conn()
            .query_row("SELECT token_hash FROM user_sessions", [], |r| r.get(0))
            .unwrap();
        assert_ne!(stored, token);
        assert_eq!(stored.len(), 64); // sha256 hex
    }

    #[test]
    fn expired_token_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        let (_, token) = store
            .create_session(&uid, Duration::seconds(-1), None)
            .unwrap();
        assert!(matches!(
            store.authenticate(&token),
            Err(StoreError::NotFound)
        ));
        assert_eq!(store.purge_expired_sessions().unwrap(), 1);
    }

    #[test]
    fn logout_invalidates_token() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        let (_, token) = store.create_session(&uid, Duration::days(1), None).unwrap();
        store.delete_session(&token).unwrap();
        assert!(store.authenticate(&token).is_err());
    }
}
