//! Error types for Flowgate
//!
//! This module defines the error taxonomy shared by the credential pool,
//! the Flow protocol client, the captcha broker and the HTTP edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Backend rejected credentials: {0}")]
    Auth(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Captcha failure: {0}")]
    CaptchaFailure(String),

    #[error("Challenge solver unavailable: {0}")]
    ChallengeUnavailable(String),

    #[error("Backend transient error: {0}")]
    BackendTransient(String),

    #[error("Backend returned an unusable payload: {0}")]
    BackendMalformed(String),

    #[error("No eligible credential available: {0}")]
    NoCapacity(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid proxy configuration: {0}")]
    ProxyConfig(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used by retry policy and credential bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    QuotaExhausted,
    CaptchaFailure,
    ChallengeUnavailable,
    BackendTransient,
    BackendMalformed,
    NoCapacity,
    Timeout,
    ProxyConfig,
    Client,
    Internal,
}

impl ErrorKind {
    /// Failures worth another attempt against the same credential
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::BackendTransient
                | ErrorKind::Timeout
                | ErrorKind::CaptchaFailure
                | ErrorKind::ChallengeUnavailable
        )
    }

    /// Failures answered by fetching a new challenge token
    pub fn is_challenge(self) -> bool {
        matches!(self, ErrorKind::CaptchaFailure | ErrorKind::ChallengeUnavailable)
    }

    /// Failures that disable the credential immediately, regardless of the
    /// consecutive-error threshold
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorKind::QuotaExhausted)
    }

    /// Label used in metrics and synthetic ban reasons
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth_revoked",
            ErrorKind::QuotaExhausted => "quota_exhausted",
            ErrorKind::CaptchaFailure => "captcha_failure",
            ErrorKind::ChallengeUnavailable => "challenge_unavailable",
            ErrorKind::BackendTransient => "backend_transient",
            ErrorKind::BackendMalformed => "backend_malformed",
            ErrorKind::NoCapacity => "no_capacity",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ProxyConfig => "proxy_config",
            ErrorKind::Client => "client",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Classify this error for retry and bookkeeping decisions
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Auth(_) => ErrorKind::Auth,
            AppError::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            AppError::CaptchaFailure(_) => ErrorKind::CaptchaFailure,
            AppError::ChallengeUnavailable(_) => ErrorKind::ChallengeUnavailable,
            AppError::BackendTransient(_) => ErrorKind::BackendTransient,
            AppError::BackendMalformed(_) | AppError::JsonError(_) => ErrorKind::BackendMalformed,
            AppError::NoCapacity(_) => ErrorKind::NoCapacity,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::ProxyConfig(_) => ErrorKind::ProxyConfig,
            AppError::HttpError(e) if e.is_timeout() => ErrorKind::Timeout,
            AppError::HttpError(_) => ErrorKind::BackendTransient,
            AppError::Unauthorized
            | AppError::InvalidApiKey
            | AppError::NotFound(_)
            | AppError::BadRequest(_) => ErrorKind::Client,
            AppError::RedisError(_) | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code, shared by JSON bodies and stream errors
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::InvalidApiKey => "INVALID_API_KEY",
            AppError::Auth(_) => "BACKEND_AUTH_ERROR",
            AppError::QuotaExhausted(_) => "QUOTA_EXHAUSTED",
            AppError::CaptchaFailure(_) => "CAPTCHA_FAILURE",
            AppError::ChallengeUnavailable(_) => "CAPTCHA_UNAVAILABLE",
            AppError::BackendTransient(_) => "BACKEND_UNAVAILABLE",
            AppError::BackendMalformed(_) => "BACKEND_MALFORMED",
            AppError::NoCapacity(_) => "NO_CAPACITY",
            AppError::Timeout(_) => "TIMEOUT",
            AppError::ProxyConfig(_) => "PROXY_CONFIG_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::RedisError(_) => "STORE_ERROR",
            AppError::HttpError(_) => "UPSTREAM_ERROR",
            AppError::JsonError(_) => "INVALID_JSON",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized | AppError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            AppError::Auth(_) => StatusCode::BAD_GATEWAY,
            AppError::QuotaExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::CaptchaFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::ChallengeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::BackendTransient(_) | AppError::HttpError(_) => StatusCode::BAD_GATEWAY,
            AppError::BackendMalformed(_) => StatusCode::BAD_GATEWAY,
            AppError::NoCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ProxyConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::JsonError(_) => StatusCode::BAD_REQUEST,
            AppError::RedisError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to API callers
    pub fn public_message(&self) -> String {
        match self {
            AppError::RedisError(_) => "Credential store error".to_string(),
            AppError::HttpError(_) => "Upstream service error".to_string(),
            AppError::JsonError(_) => "Invalid JSON".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.public_message(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
