use alfred_core::error::ErrorKind;
use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Agent output error: {0}")]
    Output(String),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Provider(e) => e.kind(),
            AgentError::Output(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
