//! Admin API key authentication middleware.
//!
//! Operators authenticate with `Authorization: Bearer <key>`. Only the
//! SHA-256 hex digest of the key is configured (`ADMIN_API_KEY_SHA256`), so
//! the key itself never sits in the environment. With no digest configured
//! every admin request is rejected.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};

use crate::{error::AppError, state::AppState};

/// Hex SHA-256 of an API key.
pub fn hash_api_key(api_key: &str) -> String {
    hex::encode(Sha256::digest(api_key.as_bytes()))
}

/// Rejects the request with 401 unless it carries the admin key.
pub async fn admin_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let expected = state
        .config
        .admin_api_key_sha256
        .as_deref()
        .ok_or(AppError::InvalidApiKey)?;

    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    if !hash_api_key(api_key).eq_ignore_ascii_case(expected.trim()) {
        tracing::warn!("Rejected admin request with an unknown API key");
        return Err(AppError::InvalidApiKey);
    }

    Ok(next.run(request).await)
}
