//! Google OAuth 2.0: authorization URL, code exchange, and refresh.
//!
//! The client-secret JSON is the standard download from the Google
//! console (either the `web` or `installed` wrapper).

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{check_response, GoogleError, Result};

pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";
pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";
pub const USERINFO_EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";
pub const USERINFO_PROFILE_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.profile";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URI: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}
fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct CredentialsFile {
    web: Option<GoogleCredentials>,
    installed: Option<GoogleCredentials>,
}

impl GoogleCredentials {
    /// Placeholder for deployments without Google credentials; any token
    /// round-trip fails at the provider, which is the right failure mode.
    pub fn unconfigured() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_uri: default_auth_uri(),
            token_uri: default_token_uri(),
        }
    }

    /// Parse the raw client-secret JSON (with or without its wrapper key).
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(GoogleError::Credentials(
                "PROVIDER_CREDENTIALS_JSON is empty".into(),
            ));
        }
        if let Ok(file) = serde_json::from_str::<CredentialsFile>(raw) {
            if let Some(creds) = file.web.or(file.installed) {
                return Ok(creds);
            }
        }
        serde_json::from_str::<GoogleCredentials>(raw)
            .map_err(|e| GoogleError::Credentials(format!("bad credentials JSON: {e}")))
    }
}

/// A completed token exchange or refresh.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs))
    }

    pub fn scopes(&self) -> Vec<String> {
        self.scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}

/// The signed-in identity, fetched once after the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
}

pub struct OAuthClient {
    credentials: GoogleCredentials,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(credentials: GoogleCredentials) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                alfred_core::config::CALENDAR_TIMEOUT_SECS,
            ))
            .build()
            .expect("reqwest client");
        Self { credentials, http }
    }

    /// Build the consent-screen URL the mobile client opens.
    pub fn auth_url(&self, redirect_uri: &str, state: &str, scopes: &[&str]) -> String {
        let scope = scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}\
             &access_type=offline&prompt=consent",
            self.credentials.auth_uri,
            urlencode(&self.credentials.client_id),
            urlencode(redirect_uri),
            urlencode(&scope),
            urlencode(state),
        )
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenResponse> {
        debug!("exchanging OAuth authorization code");
        let resp = self
            .http
            .post(&self.credentials.token_uri)
            .form(&[
                ("code", code),
                ("client_id", &self.credentials.client_id),
                ("client_secret", &self.credentials.client_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json().await.map_err(|e| GoogleError::Parse(e.to_string()))
    }

    /// Mint a fresh access token from a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        debug!("refreshing OAuth access token");
        let resp = self
            .http
            .post(&self.credentials.token_uri)
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", &self.credentials.client_id),
                ("client_secret", &self.credentials.client_secret),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json().await.map_err(|e| GoogleError::Parse(e.to_string()))
    }

    /// Who signed in — resolves the stable provider id + email.
    pub async fn userinfo(&self, access_token: &str) -> Result<UserInfo> {
        let resp = self
            .http
            .get(USERINFO_URI)
            .bearer_auth(access_token)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json().await.map_err(|e| GoogleError::Parse(e.to_string()))
    }
}

/// Minimal percent-encoding for query components.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}
