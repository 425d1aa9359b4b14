use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Row not found")]
    NotFound,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("ENCRYPTION_KEY is required to store provider tokens")]
    MissingEncryptionKey,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound => ErrorKind::NotFound,
            StoreError::InvalidState(_) => ErrorKind::Validation,
            StoreError::Database(_)
            | StoreError::Crypto(_)
            | StoreError::MissingEncryptionKey
            | StoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
