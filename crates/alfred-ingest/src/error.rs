use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(#[from] alfred_store::StoreError),

    #[error("Bus closed")]
    Bus(#[from] alfred_core::error::CoreError),

    #[error("Google API error: {0}")]
    Google(#[from] alfred_google::GoogleError),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Store(e) => e.kind(),
            IngestError::Bus(e) => e.kind(),
            IngestError::Google(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
