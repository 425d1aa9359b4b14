//! Interface boundary to the external messaging-protocol sidecars.
//!
//! Each user gets a namespaced endpoint on the source's bridge process
//! (`{base_url}/u/{user_id}/...`); the bridge owns the actual protocol
//! connection and exposes a small HTTP surface: connect, pair, events,
//! session export, contacts, disconnect.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, Result};

const BRIDGE_TIMEOUT_SECS: u64 = 30;

/// A chat message delivered by the bridge (live or from history).
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeMessage {
    pub chat_id: String,
    #[serde(default)]
    pub chat_name: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_group: bool,
    #[serde(default)]
    pub from_me: bool,
}

/// One conversation's slice of a history-sync delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConversation {
    pub chat_id: String,
    #[serde(default)]
    pub chat_name: String,
    #[serde(default)]
    pub is_group: bool,
    /// Exact total over all history entries for this conversation.
    pub total_count: i64,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Most recent message bodies, newest last.
    #[serde(default)]
    pub messages: Vec<BridgeMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeContact {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Everything the bridge can tell us, in delivery order.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connected {
        #[serde(default)]
        phone_number: Option<String>,
    },
    Disconnected,
    PairingCode {
        code: String,
    },
    Message(BridgeMessage),
    /// One chunk of a provider "history ready" delivery.
    HistoryChunk {
        conversations: Vec<BridgeConversation>,
    },
    ContactsUpdated {
        contacts: Vec<BridgeContact>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeStatus {
    pub connected: bool,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// The protocol sidecar, seen from this process. Implemented over HTTP in
/// production and by fakes in tests.
#[async_trait]
pub trait BridgeTransport: Send + Sync {
    /// Start (or resume, given a session blob) the protocol session.
    async fn connect(&self, session_blob: Option<Vec<u8>>) -> Result<()>;

    /// Request a pairing code for a phone number.
    async fn pair(&self, phone_number: &str) -> Result<String>;

    /// Drain pending events since the last poll.
    async fn poll_events(&self) -> Result<Vec<BridgeEvent>>;

    /// Export the opaque protocol session for the sidecar store.
    async fn export_session(&self) -> Result<Option<Vec<u8>>>;

    async fn contacts(&self) -> Result<Vec<BridgeContact>>;

    async fn status(&self) -> Result<BridgeStatus>;

    async fn disconnect(&self) -> Result<()>;
}

/// Response envelope used by the bridge HTTP API.
#[derive(Deserialize)]
#[serde(bound(deserialize = "T: serde::de::Deserialize<'de>"))]
struct BridgeResponse<T> {
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

/// Production transport: one sidecar process per source, per-user routes.
pub struct HttpBridge {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBridge {
    pub fn new(base_url: &str, user_id: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(BRIDGE_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: format!("{}/u/{}", base_url.trim_end_matches('/'), user_id),
        }
    }

    async fn unwrap<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Bridge(format!("{status}: {body}")));
        }
        let envelope: BridgeResponse<T> = resp
            .json()
            .await
            .map_err(|e| ClientError::Bridge(format!("bad envelope: {e}")))?;
        if let Some(error) = envelope.error {
            return Err(ClientError::Bridge(error));
        }
        envelope
            .data
            .ok_or_else(|| ClientError::Bridge("empty response data".into()))
    }
}

#[async_trait]
impl BridgeTransport for HttpBridge {
    async fn connect(&self, session_blob: Option<Vec<u8>>) -> Result<()> {
        debug!(url = %self.base_url, "bridge connect");
        let mut req = self.http.post(format!("{}/connect", self.base_url));
        if let Some(blob) = session_blob {
            req = req.body(blob);
        }
        let _: serde_json::Value = Self::unwrap(req.send().await?).await?;
        Ok(())
    }

    async fn pair(&self, phone_number: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct PairData {
            code: String,
        }
        let resp = self
            .http
            .post(format!("{}/pair", self.base_url))
            .json(&serde_json::json!({ "phone_number": phone_number }))
            .send()
            .await?;
        let data: PairData = Self::unwrap(resp).await?;
        Ok(data.code)
    }

    async fn poll_events(&self) -> Result<Vec<BridgeEvent>> {
        let resp = self
            .http
            .get(format!("{}/events", self.base_url))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    async fn export_session(&self) -> Result<Option<Vec<u8>>> {
        let resp = self
            .http
            .get(format!("{}/session", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Bridge(format!("{status}: {body}")));
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    async fn contacts(&self) -> Result<Vec<BridgeContact>> {
        let resp = self
            .http
            .get(format!("{}/contacts", self.base_url))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    async fn status(&self) -> Result<BridgeStatus> {
        let resp = self
            .http
            .get(format!("{}/status", self.base_url))
            .send()
            .await?;
        Self::unwrap(resp).await
    }

    async fn disconnect(&self) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/disconnect", self.base_url))
            .send()
            .await?;
        let _: serde_json::Value = Self::unwrap(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_deserialize_from_bridge_json() {
        let json = serde_json::json!([
            {"type": "connected", "phone_number": "+4917000"},
            {"type": "pairing_code", "code": "ABCD-1234"},
            {"type": "message", "chat_id": "4917@c.us", "sender_id": "4917@c.us",
             "text": "hi", "timestamp": "2026-02-08T10:00:00Z"},
            {"type": "history_chunk", "conversations": [
                {"chat_id": "4917@c.us", "chat_name": "Ada", "total_count": 120,
                 "messages": []}
            ]},
            {"type": "disconnected"}
        ]);
        let events: Vec<BridgeEvent> = serde_json::from_value(json).unwrap();
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], BridgeEvent::Connected { .. }));
        assert!(matches!(events[3], BridgeEvent::HistoryChunk { .. }));
    }

    #[test]
    fn per_user_routes_are_namespaced() {
        let bridge = HttpBridge::new("http://127.0.0.1:3001/", "user-42");
        assert_eq!(bridge.base_url, "http://127.0.0.1:3001/u/user-42");
    }
}
