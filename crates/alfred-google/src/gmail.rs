//! Gmail REST — message listing, bodies, and thread history for the
//! polling worker.
//!
//! Gmail's `after:` operator has day granularity, so the poller re-applies
//! an exact `internalDate` cutoff after fetching (§ the worker, not here).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use alfred_core::types::ChannelType;

use crate::error::{check_response, GoogleError, Result};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// A normalized Gmail message.
#[derive(Debug, Clone)]
pub struct GmailMessage {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub subject: String,
    pub body_text: String,
    /// Exact receive time (Gmail `internalDate`, epoch millis).
    pub received_at: DateTime<Utc>,
}

pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl Default for GmailClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.to_string())
    }
}

impl GmailClient {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                alfred_core::config::CALENDAR_TIMEOUT_SECS,
            ))
            .build()
            .expect("reqwest client");
        Self { http, base_url }
    }

    /// Message ids matching `query`, newest first (provider order).
    pub async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<String>> {
        debug!(query, "listing gmail messages");
        let url = format!("{}/users/me/messages", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("q", query), ("maxResults", &max_results.to_string())])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let list: MessageListResponse = resp
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))?;
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    pub async fn get_message(&self, access_token: &str, id: &str) -> Result<GmailMessage> {
        let url = format!("{}/users/me/messages/{}", self.base_url, id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let raw: RawMessage = resp
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))?;
        Ok(normalize(raw))
    }

    /// All messages of a thread, oldest first.
    pub async fn get_thread(&self, access_token: &str, thread_id: &str) -> Result<Vec<GmailMessage>> {
        let url = format!("{}/users/me/threads/{}", self.base_url, thread_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let raw: RawThread = resp
            .json()
            .await
            .map_err(|e| GoogleError::Parse(e.to_string()))?;
        let mut messages: Vec<GmailMessage> = raw.messages.into_iter().map(normalize).collect();
        messages.sort_by_key(|m| m.received_at);
        Ok(messages)
    }
}

/// Search expression for one enabled email source.
///
/// `after` is epoch seconds; the day-granular operator over-fetches and the
/// caller applies the exact cutoff on `received_at`.
pub fn build_query(channel_type: ChannelType, identifier: &str, after_epoch: i64) -> String {
    let selector = match channel_type {
        ChannelType::Sender => format!("from:{identifier}"),
        ChannelType::Domain => format!("from:{identifier}"),
        ChannelType::Category => format!("category:{identifier}"),
        // group channels don't occur for gmail; treat like a sender
        ChannelType::Group => format!("from:{identifier}"),
    };
    format!("{selector} after:{after_epoch}")
}

// --- raw provider shapes -----------------------------------------------

#[derive(Deserialize)]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Deserialize)]
struct RawThread {
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: String,
    #[serde(rename = "internalDate", default)]
    internal_date: Option<String>,
    payload: Option<RawPayload>,
}

#[derive(Deserialize, Default)]
struct RawPayload {
    #[serde(default)]
    headers: Vec<RawHeader>,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    #[serde(default)]
    body: Option<RawBody>,
    #[serde(default)]
    parts: Vec<RawPayload>,
}

#[derive(Deserialize)]
struct RawHeader {
    name: String,
    value: String,
}

#[derive(Deserialize, Default)]
struct RawBody {
    #[serde(default)]
    data: Option<String>,
}

fn normalize(raw: RawMessage) -> GmailMessage {
    let payload = raw.payload.unwrap_or_default();
    let header = |name: &str| {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.clone())
            .unwrap_or_default()
    };

    let received_at = raw
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    GmailMessage {
        id: raw.id,
        thread_id: raw.thread_id,
        from: header("From"),
        to: header("To"),
        date: header("Date"),
        subject: header("Subject"),
        body_text: extract_text(&payload),
        received_at,
    }
}

/// Depth-first hunt for the first text/plain part; falls back to the
/// top-level body for single-part messages.
fn extract_text(payload: &RawPayload) -> String {
    if payload.mime_type == "text/plain" {
        if let Some(text) = decode_body(payload) {
            return text;
        }
    }
    for part in &payload.parts {
        let text = extract_text(part);
        if !text.is_empty() {
            return text;
        }
    }
    if payload.parts.is_empty() {
        decode_body(payload).unwrap_or_default()
    } else {
        String::new()
    }
}

fn decode_body(payload: &RawPayload) -> Option<String> {
    let data = payload.body.as_ref()?.data.as_deref()?;
    let bytes = URL_SAFE_NO_PAD.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_selectors_per_channel_type() {
        assert_eq!(
            build_query(ChannelType::Sender, "boss@acme.com", 1700000000),
            "from:boss@acme.com after:1700000000"
        );
        assert_eq!(
            build_query(ChannelType::Category, "updates", 1700000000),
            "category:updates after:1700000000"
        );
        assert_eq!(
            build_query(ChannelType::Domain, "acme.com", 1700000000),
            "from:acme.com after:1700000000"
        );
    }

    #[test]
    fn multipart_message_normalizes_to_text_plain() {
        let body = URL_SAFE_NO_PAD.encode("Meeting Friday 14:00");
        let json = serde_json::json!({
            "id": "m1",
            "threadId": "t1",
            "internalDate": "1770000000000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [
                    {"name": "From", "value": "boss@acme.com"},
                    {"name": "Subject", "value": "Review"},
                    {"name": "Date", "value": "Sun, 8 Feb 2026 10:00:00 +0100"},
                    {"name": "To", "value": "me@example.com"}
                ],
                "parts": [
                    {"mimeType": "text/html", "body": {"data": "PGI+aHRtbDwvYj4"}},
                    {"mimeType": "text/plain", "body": {"data": body}}
                ]
            }
        });
        let raw: RawMessage = serde_json::from_value(json).unwrap();
        let message = normalize(raw);
        assert_eq!(message.body_text, "Meeting Friday 14:00");
        assert_eq!(message.subject, "Review");
        assert_eq!(message.from, "boss@acme.com");
        assert_eq!(message.received_at.timestamp_millis(), 1_770_000_000_000);
    }

    #[test]
    fn missing_payload_yields_empty_body() {
        let raw: RawMessage =
            serde_json::from_value(serde_json::json!({"id": "m2", "threadId": "t2"})).unwrap();
        let message = normalize(raw);
        assert!(message.body_text.is_empty());
        assert!(message.subject.is_empty());
    }
}
