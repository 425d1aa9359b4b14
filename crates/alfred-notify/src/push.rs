//! Push delivery provider — a single HTTP `send` with a device token and a
//! JSON payload.

use serde::Serialize;
use tracing::debug;

use alfred_core::config::NOTIFY_TIMEOUT_SECS;

use crate::error::{NotifyError, Result};

#[derive(Debug, Clone, Serialize)]
struct PushRequest<'a> {
    device_token: &'a str,
    title: &'a str,
    body: &'a str,
    data: &'a serde_json::Value,
}

pub struct PushSender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl PushSender {
    /// `None` when no push endpoint is configured.
    pub fn from_config(api_url: &str, api_key: &str) -> Option<Self> {
        if api_url.is_empty() {
            return None;
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()
            .expect("reqwest client");
        Some(Self {
            http,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn send(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<()> {
        debug!(title, "sending push notification");
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&PushRequest {
                device_token,
                title,
                body,
                data,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Api {
                status: status.as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
