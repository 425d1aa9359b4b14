use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("No client for this user and source")]
    NotConnected,

    #[error("Session store error: {0}")]
    SessionStore(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] alfred_store::StoreError),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Bridge(_) | ClientError::Http(_) => ErrorKind::TransientExternal,
            ClientError::NotConnected => ErrorKind::Validation,
            ClientError::SessionStore(_) => ErrorKind::Internal,
            ClientError::Store(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
