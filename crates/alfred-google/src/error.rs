use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GoogleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Google API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("OAuth credentials error: {0}")]
    Credentials(String),
}

impl GoogleError {
    /// Classify per the workspace error model: 401/403 demand a token
    /// refresh, 429/5xx/transport errors are retried, any other 4xx can't
    /// succeed as-is.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GoogleError::Http(_) => ErrorKind::TransientExternal,
            GoogleError::Api { status, .. } => match status {
                401 | 403 => ErrorKind::ProviderAuth,
                429 => ErrorKind::TransientExternal,
                s if *s >= 500 => ErrorKind::TransientExternal,
                _ => ErrorKind::PermanentExternal,
            },
            GoogleError::Parse(_) => ErrorKind::Internal,
            GoogleError::Credentials(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, GoogleError>;

/// Shared response check used by every Google client in this crate.
pub(crate) async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(GoogleError::Api {
        status: status.as_u16(),
        message,
    })
}
