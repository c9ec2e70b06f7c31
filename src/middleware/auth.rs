//! API key authentication
//!
//! Inbound clients present the configured API key as a Bearer token.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use crate::{error::AppError, AppState};

/// Extract the bearer token from an Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

/// SHA-256 digest of a key, hex encoded
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Reject requests without the configured API key
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn api_key_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let presented = extract_bearer_token(auth_header).ok_or(AppError::InvalidApiKey)?;

    // Compare digests so the comparison does not depend on key contents.
    if hash_key(presented) != hash_key(&state.config.api_key) {
        warn!("Rejected request with invalid API key");
        return Err(AppError::InvalidApiKey);
    }

    debug!("API key accepted");
    Ok(next.run(request).await)
}
