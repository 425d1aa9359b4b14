use alfred_core::types::UserId;
use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: UserId,
    pub provider_id: String,
    pub email: String,
    pub display_name: String,
    /// Preferred IANA zone name, e.g. "Europe/Berlin".
    pub timezone: String,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId::from(row.get::<_, String>(0)?),
        provider_id: row.get(1)?,
        email: row.get(2)?,
        display_name: row.get(3)?,
        timezone: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

const USER_COLUMNS: &str =
    "id, provider_id, email, display_name, timezone, created_at, updated_at";

impl Store {
    /// Create the user on first federated sign-in, or refresh email and
    /// display name on a returning one. Users are never deleted here.
    pub fn upsert_user(
        &self,
        provider_id: &str,
        email: &str,
        display_name: &str,
    ) -> Result<User> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE provider_id = ?1",
                [provider_id],
                |row| row.get(0),
            )
            .ok();

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE users SET email = ?1, display_name = ?2, updated_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![email, display_name, now, id],
                )?;
                id
            }
            None => {
                let id = UserId::new().0;
                conn.execute(
                    "INSERT INTO users (id, provider_id, email, display_name, timezone,
                                        created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, 'UTC', ?5, ?5)",
                    rusqlite::params![id, provider_id, email, display_name, now],
                )?;
                id
            }
        };

        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            [&id],
            row_to_user,
        )
        .map_err(StoreError::from)
    }

    pub fn get_user(&self, user_id: &UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [user_id.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::from(other),
            })
    }

    pub fn set_user_timezone(&self, user_id: &UserId, timezone: &str) -> Result<()> {
        let n = self.conn().execute(
            "UPDATE users SET timezone = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![timezone, Utc::now().to_rfc3339(), user_id.as_str()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
