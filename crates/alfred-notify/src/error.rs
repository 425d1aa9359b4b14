use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Delivery provider error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Delivery channel not configured: {0}")]
    NotConfigured(&'static str),
}

impl NotifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NotifyError::Http(_) => ErrorKind::TransientExternal,
            NotifyError::Api { status, .. } if *status >= 500 || *status == 429 => {
                ErrorKind::TransientExternal
            }
            NotifyError::Api { .. } => ErrorKind::PermanentExternal,
            NotifyError::NotConfigured(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, NotifyError>;
