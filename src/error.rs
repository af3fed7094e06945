use axum::http::StatusCode;
use axum::http::header::{RETRY_AFTER, WWW_AUTHENTICATE};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::rate_limit::RateLimitError;

/// Message returned for every authentication failure.
///
/// Expired, forged and malformed credentials all look the same to the client
/// so the response cannot be used as an oracle.
pub const UNAUTHENTICATED_MESSAGE: &str = "Missing, invalid or expired credential.";

/// Application-wide error types with appropriate HTTP status codes.
#[derive(Error, Debug)]
pub enum AppError {
    /// Any credential failure. `kind` is the log label, never sent to the client.
    #[error("Authentication failed: {kind}")]
    Unauthenticated { realm: String, kind: &'static str },

    #[error("Too many failed authentication attempts, retry after {retry_after_secs}s")]
    TooManyAttempts { retry_after_secs: u64 },

    #[error("Rate limiting failed: {0}")]
    RateLimit(#[from] RateLimitError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for API endpoints.
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
    pub(crate) message: String,
}

impl ErrorResponse {
    pub(crate) fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// Build the uniform 401 response with a Bearer challenge for `realm`.
pub fn unauthenticated_response(realm: &str) -> Response {
    let challenge = if realm.is_empty() {
        "Bearer".to_string()
    } else {
        format!("Bearer realm=\"{}\"", realm.replace('"', ""))
    };

    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, challenge)],
        axum::Json(ErrorResponse::new("unauthorized", UNAUTHENTICATED_MESSAGE)),
    )
        .into_response()
}

/// Build the 500 response used when the quota store cannot be consulted.
pub fn store_unavailable_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(ErrorResponse::new(
            "rate_limit_unavailable",
            "Request admission is temporarily unavailable. Please try again later.",
        )),
    )
        .into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full detail stays in the server log; clients get sanitized messages
        match &self {
            // Callers log these with request context
            AppError::Unauthenticated { realm, .. } => return unauthenticated_response(realm),
            AppError::TooManyAttempts { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(ErrorResponse::new(
                        "too_many_requests",
                        "Too many failed authentication attempts. Please wait before retrying.",
                    )),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, (*retry_after_secs).into());
                return response;
            }
            AppError::RateLimit(e) if e.is_store_failure() => return store_unavailable_response(),
            _ => tracing::error!(error = %self, "Request failed"),
        }

        let (error_type, message) = match &self {
            AppError::ConfigError(_) => (
                "config_error",
                "Service configuration error. Please contact support.",
            ),
            _ => (
                "internal_error",
                "An internal error occurred. Please contact support if the issue persists.",
            ),
        };

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(ErrorResponse::new(error_type, message)),
        )
            .into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_carries_realm_challenge() {
        let err = AppError::Unauthenticated {
            realm: "tollgate".to_string(),
            kind: "expired",
        };
        assert!(err.to_string().contains("expired"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Bearer realm=\"tollgate\""
        );
    }

    #[test]
    fn test_too_many_attempts_sets_retry_after() {
        let response = AppError::TooManyAttempts {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }

    #[test]
    fn test_store_failure_maps_to_500() {
        let err = RateLimitError::StoreTimeout(std::time::Duration::from_millis(10));
        let response = AppError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_challenge_includes_realm() {
        let response = unauthenticated_response("tollgate");
        assert_eq!(
            response.headers()[WWW_AUTHENTICATE],
            "Bearer realm=\"tollgate\""
        );
    }

    #[test]
    fn test_challenge_without_realm() {
        let response = unauthenticated_response("");
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
    }
}
