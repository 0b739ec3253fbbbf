/// Error types for the ingest gateway
///
/// Errors map onto the endpoint's three failure statuses: 400 for
/// validation, 409 for idempotency-key conflicts, 503 when the log publish
/// (or the registry behind it) is unavailable. The caller owns retry via
/// the idempotency key; nothing is retried here.
use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::fmt;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, AppError>;

pub const CONFLICT_MESSAGE: &str = "Idempotency key was reused with a different payload.";

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Envelope or header validation failed
    Validation(String),

    /// Idempotency key reused with a different payload
    Conflict,

    /// Log publish (or registry access) failed; safe to retry with the
    /// same idempotency key
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "Validation error: {}", msg),
            AppError::Conflict => write!(f, "{}", CONFLICT_MESSAGE),
            AppError::Unavailable(msg) => write!(f, "Unavailable: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Validation(msg) => {
                HttpResponse::BadRequest().json(serde_json::json!({ "error": msg }))
            }
            AppError::Conflict => {
                HttpResponse::Conflict().json(serde_json::json!({ "error": CONFLICT_MESSAGE }))
            }
            // No body on 503: the caller's only signal is "retry later".
            AppError::Unavailable(_) => HttpResponse::ServiceUnavailable().finish(),
        }
    }
}

impl From<idempotency_registry::RegistryError> for AppError {
    fn from(err: idempotency_registry::RegistryError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_unavailable_response_has_no_body() {
        let response = AppError::Unavailable("broker down".into()).error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
