use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::crypto::TokenCipher;
use crate::error::Result;
use crate::migrations;

/// Shared handle to the embedded database.
///
/// Wraps the connection in a `Mutex` so worker tasks and HTTP handlers can
/// share one handle; SQLite serializes writers anyway, and the busy
/// timeout covers the rare contention window. Clone freely.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    cipher: Option<Arc<TokenCipher>>,
}

impl Store {
    /// Open (or create) the database at `path`, apply migrations, and set
    /// the connection pragmas.
    pub fn open(path: &str, encryption_key: Option<&str>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn, encryption_key)?;
        info!(path, "store opened");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, Some("test-encryption-key"))
    }

    fn from_connection(mut conn: Connection, encryption_key: Option<&str>) -> Result<Self> {
        // journal_mode returns the resulting mode as a row
        let _mode: String =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(
            alfred_core::config::SQL_BUSY_TIMEOUT_SECS,
        ))?;
        migrations::apply(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cipher: encryption_key.map(|k| Arc::new(TokenCipher::new(k))),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    pub(crate) fn cipher(&self) -> Option<&TokenCipher> {
        self.cipher.as_deref()
    }

    /// Liveness probe for /health.
    pub fn ping(&self) -> bool {
        self.conn()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_applies_schema() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.ping());
        let n: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='users'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(n, 1);
    }
}
