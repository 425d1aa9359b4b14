use thiserror::Error;

/// Concept-level error classification shared across the workspace.
///
/// Workers and the HTTP layer switch on the kind, never on message text:
/// retries apply only to `TransientExternal`, token refresh only to
/// `ProviderAuth`, and ownership mismatches always surface as `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or violated precondition. Never retried.
    Validation,
    /// Row absent or not visible to the current user.
    NotFound,
    /// Missing or expired session.
    Unauthenticated,
    /// 5xx / timeout / 429 from a third party. Retried with backoff.
    TransientExternal,
    /// Non-auth 4xx from a third party; the request can't succeed as-is.
    PermanentExternal,
    /// 401/403 from a provider; triggers token refresh.
    ProviderAuth,
    /// Bugs and invariant violations.
    Internal,
}

impl ErrorKind {
    /// Fixed HTTP status for this kind. The mobile client switches on the
    /// status code, not the message.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::TransientExternal => 503,
            ErrorKind::PermanentExternal => 502,
            ErrorKind::ProviderAuth => 502,
            ErrorKind::Internal => 500,
        }
    }

    /// Short opaque code string sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::TransientExternal => "transient",
            ErrorKind::PermanentExternal => "permanent",
            ErrorKind::ProviderAuth => "provider_auth",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors owned by this crate (config loading, bus wiring).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Message bus closed")]
    BusClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Internal,
            CoreError::BusClosed => ErrorKind::Internal,
            CoreError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
