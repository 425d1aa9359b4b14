//! Versioned migrations, applied in order at startup and recorded in
//! `schema_migrations`. Each migration runs in its own transaction.

use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "identity_and_sources",
        sql: "CREATE TABLE users (
                  id            TEXT PRIMARY KEY NOT NULL,
                  provider_id   TEXT NOT NULL UNIQUE,
                  email         TEXT NOT NULL,
                  display_name  TEXT NOT NULL DEFAULT '',
                  timezone      TEXT NOT NULL DEFAULT 'UTC',
                  created_at    TEXT NOT NULL,
                  updated_at    TEXT NOT NULL
              );
              CREATE TABLE user_sessions (
                  id          TEXT PRIMARY KEY NOT NULL,
                  token_hash  TEXT NOT NULL UNIQUE,
                  user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  expires_at  TEXT NOT NULL,
                  device_tag  TEXT,
                  created_at  TEXT NOT NULL
              );
              CREATE INDEX idx_user_sessions_user ON user_sessions(user_id);
              CREATE TABLE provider_tokens (
                  id            TEXT PRIMARY KEY NOT NULL,
                  user_id       TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  provider      TEXT NOT NULL,
                  access_token  TEXT NOT NULL,
                  refresh_token TEXT,
                  scopes        TEXT NOT NULL DEFAULT '[]',
                  expires_at    TEXT,
                  invalid       INTEGER NOT NULL DEFAULT 0,
                  created_at    TEXT NOT NULL,
                  updated_at    TEXT NOT NULL,
                  UNIQUE(user_id, provider)
              );
              CREATE TABLE messaging_sessions (
                  id                INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  source_type       TEXT NOT NULL,
                  phone_number      TEXT,
                  device_id         TEXT,
                  connected         INTEGER NOT NULL DEFAULT 0,
                  last_connected_at TEXT,
                  created_at        TEXT NOT NULL,
                  updated_at        TEXT NOT NULL,
                  UNIQUE(user_id, source_type)
              );
              CREATE TABLE source_channels (
                  id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id                 TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  source_type             TEXT NOT NULL,
                  channel_type            TEXT NOT NULL,
                  identifier              TEXT NOT NULL,
                  name                    TEXT NOT NULL DEFAULT '',
                  enabled                 INTEGER NOT NULL DEFAULT 0,
                  total_message_count     INTEGER NOT NULL DEFAULT 0,
                  last_message_at         TEXT,
                  initial_backfill_status TEXT NOT NULL DEFAULT 'pending',
                  initial_backfill_at     TEXT,
                  created_at              TEXT NOT NULL,
                  updated_at              TEXT NOT NULL,
                  UNIQUE(user_id, source_type, identifier)
              );
              CREATE INDEX idx_source_channels_user ON source_channels(user_id, source_type);
              -- channel_id intentionally has no FK: channel deletion must not
              -- take message history with it. User deletion still cascades.
              CREATE TABLE source_messages (
                  id          INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  channel_id  INTEGER NOT NULL,
                  source_type TEXT NOT NULL,
                  sender_id   TEXT NOT NULL,
                  sender_name TEXT NOT NULL DEFAULT '',
                  subject     TEXT,
                  text        TEXT NOT NULL,
                  timestamp   TEXT NOT NULL,
                  created_at  TEXT NOT NULL
              );
              CREATE INDEX idx_source_messages_channel
                  ON source_messages(channel_id, timestamp DESC);",
    },
    Migration {
        version: 2,
        name: "proposals",
        sql: "CREATE TABLE calendar_events (
                  id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  channel_id          INTEGER NOT NULL,
                  external_event_id   TEXT,
                  calendar_id         TEXT NOT NULL DEFAULT 'primary',
                  title               TEXT NOT NULL,
                  description         TEXT NOT NULL DEFAULT '',
                  start_time          TEXT NOT NULL,
                  end_time            TEXT,
                  location            TEXT NOT NULL DEFAULT '',
                  status              TEXT NOT NULL DEFAULT 'pending',
                  action_type         TEXT NOT NULL DEFAULT 'create',
                  original_message_id INTEGER,
                  llm_reasoning       TEXT NOT NULL DEFAULT '',
                  llm_confidence      REAL NOT NULL DEFAULT 0,
                  quality_flags       TEXT NOT NULL DEFAULT '[]',
                  created_at          TEXT NOT NULL,
                  updated_at          TEXT NOT NULL
              );
              CREATE INDEX idx_calendar_events_user ON calendar_events(user_id, status);
              CREATE INDEX idx_calendar_events_channel ON calendar_events(user_id, channel_id);
              CREATE TABLE reminders (
                  id                        INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id                   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  channel_id                INTEGER NOT NULL,
                  external_event_id         TEXT,
                  calendar_id               TEXT NOT NULL DEFAULT 'primary',
                  title                     TEXT NOT NULL,
                  description               TEXT NOT NULL DEFAULT '',
                  location                  TEXT NOT NULL DEFAULT '',
                  due_date                  TEXT,
                  reminder_time             TEXT,
                  priority                  TEXT NOT NULL DEFAULT 'normal',
                  status                    TEXT NOT NULL DEFAULT 'pending',
                  action_type               TEXT NOT NULL DEFAULT 'create',
                  source                    TEXT NOT NULL,
                  original_message_id       INTEGER,
                  llm_reasoning             TEXT NOT NULL DEFAULT '',
                  llm_confidence            REAL NOT NULL DEFAULT 0,
                  quality_flags             TEXT NOT NULL DEFAULT '[]',
                  due_notification_sent_at  TEXT,
                  created_at                TEXT NOT NULL,
                  updated_at                TEXT NOT NULL
              );
              CREATE INDEX idx_reminders_user ON reminders(user_id, status);",
    },
    Migration {
        version: 3,
        name: "analysis_traces",
        sql: "CREATE TABLE analysis_traces (
                  id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                  user_id            TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  channel_id         INTEGER NOT NULL,
                  source_type        TEXT NOT NULL,
                  trigger_message_id INTEGER,
                  intent             TEXT NOT NULL DEFAULT '',
                  router_confidence  REAL NOT NULL DEFAULT 0,
                  action             TEXT NOT NULL,
                  confidence         REAL NOT NULL DEFAULT 0,
                  reasoning          TEXT NOT NULL DEFAULT '',
                  status             TEXT NOT NULL,
                  details_json       TEXT NOT NULL DEFAULT '{}',
                  created_at         TEXT NOT NULL
              );
              CREATE INDEX idx_analysis_traces_user
                  ON analysis_traces(user_id, created_at DESC);
              CREATE INDEX idx_analysis_traces_channel ON analysis_traces(channel_id);",
    },
    Migration {
        version: 4,
        name: "processed_emails",
        sql: "CREATE TABLE processed_emails (
                  user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                  email_id     TEXT NOT NULL,
                  processed_at TEXT NOT NULL,
                  PRIMARY KEY (user_id, email_id)
              );",
    },
    Migration {
        version: 5,
        name: "reminder_due_scan_index",
        sql: "CREATE INDEX idx_reminders_due_scan
                  ON reminders(status, due_notification_sent_at, reminder_time, due_date);",
    },
];

/// Apply all outstanding migrations. Safe to call on every startup.
pub fn apply(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.name, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "migration applied");
    }

    Ok(())
}
