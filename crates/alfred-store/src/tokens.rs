//! Encrypted OAuth tokens, one row per (user, provider).
//!
//! Access and refresh tokens are ciphertext in the table; decryption
//! happens only here, at the call sites that need the plaintext.

use alfred_core::types::UserId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct ProviderToken {
    pub user_id: UserId,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub invalid: bool,
}

impl ProviderToken {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

impl Store {
    /// Write (or overwrite) the token pair from an OAuth exchange.
    pub fn put_provider_token(
        &self,
        user_id: &UserId,
        provider: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        scopes: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let cipher = self.cipher().ok_or(StoreError::MissingEncryptionKey)?;
        let access_ct = cipher.encrypt(access_token)?;
        let refresh_ct = refresh_token.map(|t| cipher.encrypt(t)).transpose()?;
        let scopes_json = serde_json::to_string(scopes)?;
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO provider_tokens
                 (id, user_id, provider, access_token, refresh_token, scopes,
                  expires_at, invalid, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
             ON CONFLICT(user_id, provider) DO UPDATE SET
                 access_token = excluded.access_token,
                 refresh_token = COALESCE(excluded.refresh_token, refresh_token),
                 scopes = excluded.scopes,
                 expires_at = excluded.expires_at,
                 invalid = 0,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                user_id.as_str(),
                provider,
                access_ct,
                refresh_ct,
                scopes_json,
                expires_at.map(|t| t.to_rfc3339()),
                now
            ],
        )?;
        Ok(())
    }

    /// Fetch and decrypt the token for a provider, if one is stored.
    pub fn get_provider_token(
        &self,
        user_id: &UserId,
        provider: &str,
    ) -> Result<Option<ProviderToken>> {
        let row: Option<(String, Option<String>, String, Option<String>, i64)> = self
            .conn()
            .query_row(
                "SELECT access_token, refresh_token, scopes, expires_at, invalid
                 FROM provider_tokens WHERE user_id = ?1 AND provider = ?2",
                rusqlite::params![user_id.as_str(), provider],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .ok();

        let Some((access_ct, refresh_ct, scopes_json, expires_at, invalid)) = row else {
            return Ok(None);
        };

        let cipher = self.cipher().ok_or(StoreError::MissingEncryptionKey)?;
        let access_token = cipher.decrypt(&access_ct)?;
        let refresh_token = refresh_ct.map(|ct| cipher.decrypt(&ct)).transpose()?;
        let scopes: Vec<String> = serde_json::from_str(&scopes_json)?;
        let expires_at = expires_at
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| StoreError::InvalidState(format!("bad token expiry: {e}")))
            })
            .transpose()?;

        Ok(Some(ProviderToken {
            user_id: user_id.clone(),
            provider: provider.to_string(),
            access_token,
            refresh_token,
            scopes,
            expires_at,
            invalid: invalid != 0,
        }))
    }

    /// Refresh in place after a token refresh round-trip.
    pub fn update_access_token(
        &self,
        user_id: &UserId,
        provider: &str,
        access_token: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let cipher = self.cipher().ok_or(StoreError::MissingEncryptionKey)?;
        let access_ct = cipher.encrypt(access_token)?;
        let n = self.conn().execute(
            "UPDATE provider_tokens
             SET access_token = ?1, expires_at = ?2, invalid = 0, updated_at = ?3
             WHERE user_id = ?4 AND provider = ?5",
            rusqlite::params![
                access_ct,
                expires_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
                user_id.as_str(),
                provider
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Flag the token after a failed refresh; sync stays suppressed until
    /// the user reconnects.
    pub fn mark_token_invalid(&self, user_id: &UserId, provider: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE provider_tokens SET invalid = 1, updated_at = ?1
             WHERE user_id = ?2 AND provider = ?3",
            rusqlite::params![Utc::now().to_rfc3339(), user_id.as_str(), provider],
        )?;
        Ok(())
    }

    /// Reset wipes all of the user's provider tokens.
    pub fn delete_provider_tokens(&self, user_id: &UserId) -> Result<usize> {
        let n = self.conn().execute(
            "DELETE FROM provider_tokens WHERE user_id = ?1",
            [user_id.as_str()],
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
    fn token_round_trip_is_encrypted_at_rest() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        store
            .put_provider_token(
                &uid,
                "google",
                "ya29.access",
                Some("1//refresh"),
                &["calendar".into(), "gmail.readonly".into()],
                None,
            )
            .unwrap();

        let raw: String = store
            .conn()
            .query_row("SELECT access_token FROM provider_tokens", [], |r| r.get(0))
            .unwrap();
        assert!(!raw.contains("ya29"));

        let token = store.get_provider_token(&uid, "google").unwrap().unwrap();
        assert_eq!(token.access_token, "ya29.access");
        assert_eq!(token.refresh_token.as_deref(), Some("1//refresh"));
        assert!(token.has_scope("calendar"));
        assert!(!token.invalid);
    }

    #[test]
    fn refresh_in_place_keeps_refresh_token() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        store
            .put_provider_token(&uid, "google", "old", Some("keep-me"), &[], None)
            .unwrap();
        store
            .update_access_token(&uid, "google", "new", Some(Utc::now()))
            .unwrap();
        let token = store.get_provider_token(&uid, "google").unwrap().unwrap();
        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("keep-me"));
    }

    #[test]
    fn invalid_flag_clears_on_new_exchange() {
        let store = Store::open_in_memory().unwrap();
        let uid = user(&store);
        store
            .put_provider_token(&uid, "google", "t", None, &[], None)
            .unwrap();
        store.mark_token_invalid(&uid, "google").unwrap();
        assert!(store
            .get_provider_token(&uid, "google")
            .unwrap()
            .unwrap()
            .invalid);

        store
            .put_provider_token(&uid, "google", "t2", None, &[], None)
            .unwrap();
        assert!(!store
            .get_provider_token(&uid, "google")
            .unwrap()
            .unwrap()
            .invalid);
    }

    #[test]
    fn unique_per_user_not_global() {
        let store = Store::open_in_memory().unwrap();
        let a = store.upsert_user("p-a", "a@x.y", "A").unwrap().id;
        let b = store.upsert_user("p-b", "b@x.y", "B").unwrap().id;
        store
            .put_provider_token(&a, "google", "tok-a", None, &[], None)
            .unwrap();
        store
            .put_provider_token(&b, "google", "tok-b", None, &[], None)
            .unwrap();
        assert_eq!(
            store
                .get_provider_token(&a, "google")
                .unwrap()
                .unwrap()
                .access_token,
            "tok-a"
        );
    }
}
