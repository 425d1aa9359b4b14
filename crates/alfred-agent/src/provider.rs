use alfred_core::error::ErrorKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single message in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Tools to expose to the LLM. Empty means plain chat.
    pub tools: Vec<ToolDefinition>,
    /// Raw JSON messages for the tool loop (overrides `messages` when set).
    /// Needed for structured tool_use / tool_result content blocks.
    pub raw_messages: Option<Vec<serde_json::Value>>,
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub stop_reason: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Common interface for LLM providers; stubbed in tests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Http(_) => ErrorKind::TransientExternal,
            ProviderError::Api { status, .. } if *status >= 500 => ErrorKind::TransientExternal,
            ProviderError::Api { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::ProviderAuth
            }
            ProviderError::Api { .. } => ErrorKind::PermanentExternal,
            ProviderError::Parse(_) => ErrorKind::Internal,
            ProviderError::RateLimited { .. } => ErrorKind::TransientExternal,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientExternal)
    }
}

/// Base delay before the single retry.
const RETRY_BASE_MS: u64 = 750;
/// Jitter ceiling added on top of the base delay.
const RETRY_JITTER_MS: u64 = 500;

/// Send with exactly one retry on a transient failure, jittered so herd
/// retries don't line up. The second failure surfaces as-is.
pub async fn send_with_retry(
    provider: &dyn LlmProvider,
    req: &ChatRequest,
) -> Result<ChatResponse, ProviderError> {
    match provider.send(req).await {
        Ok(resp) => Ok(resp),
        Err(first) if first.is_retryable() => {
            let delay = match &first {
                ProviderError::RateLimited { retry_after_ms } => *retry_after_ms,
                _ => RETRY_BASE_MS + jitter_ms(RETRY_JITTER_MS),
            };
            warn!(provider = provider.name(), error = %first, delay_ms = delay,
                "LLM call failed, retrying once");
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            provider.send(req).await
        }
        Err(e) => Err(e),
    }
}

/// Pseudo-random jitter from the monotonic clock, avoiding a rand dependency.
fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as u64) % max
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_first: bool,
        permanent: bool,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(ProviderError::Api {
                    status: 400,
                    message: "bad request".into(),
                });
            }
            if n == 0 && self.fail_first {
                return Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".into(),
                });
            }
            Ok(ChatResponse {
                content: "ok".into(),
                model: "m".into(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    fn req() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            system: String::new(),
            messages: vec![],
            max_tokens: 64,
            temperature: 0.1,
            tools: vec![],
            raw_messages: None,
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: true,
            permanent: false,
        };
        let resp = send_with_retry(&provider, &req()).await.unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let provider = FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_first: false,
            permanent: true,
        };
        assert!(send_with_retry(&provider, &req()).await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
