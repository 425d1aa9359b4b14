//! Email delivery provider — a single HTTP `send` with from/to/subject/html.

use serde::Serialize;
use tracing::debug;

use alfred_core::config::NOTIFY_TIMEOUT_SECS;

use crate::error::{NotifyError, Result};

#[derive(Debug, Clone, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: &'a str,
}

pub struct EmailSender {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailSender {
    /// `None` when no email endpoint is configured.
    pub fn from_config(api_url: &str, api_key: &str, from: &str) -> Option<Self> {
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
            from: from.to_string(),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<()> {
        debug!(to, subject, "sending email");
        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&SendRequest {
                from: &self.from,
                to,
                subject,
                html,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_url_disables_the_channel() {
        assert!(EmailSender::from_config("", "key", "alfred@example.com").is_none());
        assert!(EmailSender::from_config("https://mail.example/send", "key", "a@b.c").is_some());
    }
}
