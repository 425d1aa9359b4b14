use alfred_core::error::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] alfred_store::StoreError),

    #[error("Agent error: {0}")]
    Agent(#[from] alfred_agent::AgentError),

    #[error("Calendar provider error: {0}")]
    Google(#[from] alfred_google::GoogleError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bus closed")]
    Bus(#[from] alfred_core::error::CoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Store(e) => e.kind(),
            EngineError::Agent(e) => e.kind(),
            EngineError::Google(e) => e.kind(),
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Bus(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
