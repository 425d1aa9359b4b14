use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

// Runtime constants — tunable via config but these are the contract defaults.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_MESSAGE_HISTORY_SIZE: usize = 25;
pub const DEFAULT_GMAIL_POLL_MINUTES: u64 = 5;
pub const DEFAULT_LLM_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_MAX_TURNS: usize = 6;
pub const DEFAULT_CONFIDENCE_FLOOR: f64 = 0.6;
/// Bus capacity = this × expected concurrent users.
pub const BUS_CAPACITY_PER_USER: usize = 100;
pub const LLM_TIMEOUT_SECS: u64 = 60;
pub const CALENDAR_TIMEOUT_SECS: u64 = 30;
pub const NOTIFY_TIMEOUT_SECS: u64 = 15;
pub const SQL_BUSY_TIMEOUT_SECS: u64 = 5;
pub const SHUTDOWN_BUDGET_SECS: u64 = 5;
pub const SYNC_SWEEP_INTERVAL_SECS: u64 = 60;
pub const REMINDER_TICK_SECS: u64 = 30;
pub const HISTORY_DEBOUNCE_MS: u64 = 2_000;
pub const SSE_HEARTBEAT_SECS: u64 = 15;

/// Top-level config (alfred.toml + env overrides).
///
/// Two env layers merge over the file: `ALFRED_*` double-underscore paths
/// (`ALFRED_HTTP__PORT=9090`) and the short documented names
/// (`LLM_API_KEY`, `DB_PATH`, `ENCRYPTION_KEY`, …).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlfredConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub bridges: BridgesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Key for provider-token encryption at rest. Required before any
    /// OAuth token can be stored; no default.
    #[serde(default)]
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            base_url: default_anthropic_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Where the per-user sidecar session blobs live
/// (`{source}.db.user_{user_id}` files on a persistent volume).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_session_store_path")]
    pub store_path: String,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            store_path: default_session_store_path(),
        }
    }
}

/// Google OAuth client configuration. `credentials_json` is the raw OAuth
/// client-secret JSON blob (never logged).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoogleConfig {
    #[serde(default)]
    pub credentials_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_history_size")]
    pub message_history_size: usize,
    #[serde(default = "default_gmail_poll_minutes")]
    pub gmail_poll_minutes: u64,
    #[serde(default = "default_history_debounce_ms")]
    pub history_debounce_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            message_history_size: default_history_size(),
            gmail_poll_minutes: default_gmail_poll_minutes(),
            history_debounce_ms: default_history_debounce_ms(),
        }
    }
}

/// Base URLs of the per-user WhatsApp/Telegram protocol sidecars.
/// The actual per-user endpoint is `{base_url}/u/{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgesConfig {
    #[serde(default = "default_whatsapp_bridge")]
    pub whatsapp_base_url: String,
    #[serde(default = "default_telegram_bridge")]
    pub telegram_base_url: String,
}

impl Default for BridgesConfig {
    fn default() -> Self {
        Self {
            whatsapp_base_url: default_whatsapp_bridge(),
            telegram_base_url: default_telegram_bridge(),
        }
    }
}

/// Email + push delivery endpoints. Empty URL disables the channel.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email_api_url: String,
    #[serde(default)]
    pub email_api_key: String,
    #[serde(default)]
    pub email_from: String,
    #[serde(default)]
    pub push_api_url: String,
    #[serde(default)]
    pub push_api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Sizing hint for the shared bus (capacity = 100 × this).
    #[serde(default = "default_expected_users")]
    pub expected_users: usize,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            expected_users: default_expected_users(),
            max_turns: default_max_turns(),
            confidence_floor: default_confidence_floor(),
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_temperature() -> f64 {
    DEFAULT_LLM_TEMPERATURE
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_base_url() -> String {
    format!("http://localhost:{}", DEFAULT_HTTP_PORT)
}
fn default_db_path() -> String {
    "alfred.db".to_string()
}
fn default_session_store_path() -> String {
    "sessions".to_string()
}
fn default_history_size() -> usize {
    DEFAULT_MESSAGE_HISTORY_SIZE
}
fn default_gmail_poll_minutes() -> u64 {
    DEFAULT_GMAIL_POLL_MINUTES
}
fn default_history_debounce_ms() -> u64 {
    HISTORY_DEBOUNCE_MS
}
fn default_whatsapp_bridge() -> String {
    "http://127.0.0.1:3001".to_string()
}
fn default_telegram_bridge() -> String {
    "http://127.0.0.1:3002".to_string()
}
fn default_expected_users() -> usize {
    10
}
fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
fn default_confidence_floor() -> f64 {
    DEFAULT_CONFIDENCE_FLOOR
}

impl AlfredConfig {
    /// Load config from a TOML file with env overrides.
    ///
    /// Precedence (low → high): alfred.toml, `ALFRED_*` paths, documented
    /// short names. Missing file is fine — defaults cover everything
    /// except `encryption_key`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("alfred.toml");

        let config: AlfredConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ALFRED_").split("__"))
            .merge(documented_env())
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Shared-bus capacity derived from the expected-users sizing hint.
    pub fn bus_capacity(&self) -> usize {
        BUS_CAPACITY_PER_USER * self.runtime.expected_users.max(1)
    }
}

/// The short env names from the deployment docs, mapped onto nested keys.
fn documented_env() -> Env {
    Env::raw()
        .only(&[
            "LLM_API_KEY",
            "LLM_MODEL",
            "LLM_TEMPERATURE",
            "PROVIDER_CREDENTIALS_JSON",
            "DB_PATH",
            "SESSION_STORE_PATH",
            "HTTP_PORT",
            "BASE_URL",
            "MESSAGE_HISTORY_SIZE",
            "GMAIL_POLL_MINUTES",
            "ENCRYPTION_KEY",
        ])
        .map(|key| {
            let upper = key.as_str().to_ascii_uppercase();
            let mapped = match upper.as_str() {
                "LLM_API_KEY" => "llm.api_key",
                "LLM_MODEL" => "llm.model",
                "LLM_TEMPERATURE" => "llm.temperature",
                "PROVIDER_CREDENTIALS_JSON" => "google.credentials_json",
                "DB_PATH" => "database.path",
                "SESSION_STORE_PATH" => "sessions.store_path",
                "HTTP_PORT" => "http.port",
                "BASE_URL" => "http.base_url",
                "MESSAGE_HISTORY_SIZE" => "ingest.message_history_size",
                "GMAIL_POLL_MINUTES" => "ingest.gmail_poll_minutes",
                "ENCRYPTION_KEY" => "encryption_key",
                _ => return key.as_str().to_string().into(),
            };
            mapped.to_string().into()
        })
        .split(".")
}
