//! Bearer-session authentication for `/api/*`.
//!
//! The token arrives in the Authorization header, or — for EventSource
//! connections that cannot set headers — in a `token` query parameter.
//! Anything that does not resolve to a user is a 401; `/health` is the
//! only unauthenticated route.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use alfred_core::types::UserId;

use crate::app::AppState;
use crate::error::ApiError;

/// The authenticated caller. Extracting this guards the handler.
pub struct AuthedUser {
    pub user_id: UserId,
    /// The presented bearer token (needed by logout).
    pub token: String,
}

impl FromRequestParts<Arc<AppState>> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token =
            bearer_token(parts).or_else(|| query_token(parts)).ok_or_else(ApiError::unauthenticated)?;

        let user_id = state
            .store
            .authenticate(&token)
            .map_err(|_| ApiError::unauthenticated())?;

        Ok(AuthedUser { user_id, token })
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?;
    let value = header.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn query_token(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    query.split('&').find_map(|pair| {
        pair.strip_prefix("token=")
            .map(str::to_string)
            .filter(|token| !token.is_empty())
    })
}
