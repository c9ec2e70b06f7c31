//! Map backend failures onto the error taxonomy

use reqwest::StatusCode;

use crate::error::AppError;

const CAPTCHA_MARKERS: &[&str] = &["recaptcha", "unusual_activity", "captcha"];
const QUOTA_MARKERS: &[&str] = &["resource_exhausted", "insufficient_credits", "insufficient credits", "quota"];

/// Classify a non-success backend response
pub fn classify_status(status: StatusCode, body: &str) -> AppError {
    let lowered = body.to_ascii_lowercase();
    let detail = format!("{} {}", status.as_u16(), truncate(body, 300));

    if QUOTA_MARKERS.iter().any(|m| lowered.contains(m)) || status == StatusCode::TOO_MANY_REQUESTS {
        return AppError::QuotaExhausted(detail);
    }

    match status {
        StatusCode::UNAUTHORIZED => AppError::Auth(detail),
        StatusCode::FORBIDDEN if CAPTCHA_MARKERS.iter().any(|m| lowered.contains(m)) => {
            AppError::CaptchaFailure(detail)
        }
        StatusCode::FORBIDDEN => AppError::Auth(detail),
        StatusCode::REQUEST_TIMEOUT => AppError::Timeout(detail),
        s if s.is_server_error() => AppError::BackendTransient(detail),
        StatusCode::BAD_REQUEST if CAPTCHA_MARKERS.iter().any(|m| lowered.contains(m)) => {
            AppError::CaptchaFailure(detail)
        }
        StatusCode::BAD_REQUEST => AppError::BadRequest(detail),
        _ => AppError::BackendMalformed(detail),
    }
}

/// Classify a transport-level failure
pub fn classify_transport(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(err.to_string())
    } else {
        AppError::BackendTransient(err.to_string())
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
