//! Authentication error types.
//!
//! Every variant is terminal for the request that produced it. The HTTP layer
//! collapses all of them into one `401 Unauthorized` response so clients cannot
//! tell an expired credential from a forged one; the sub-kind is only logged.

use thiserror::Error;

/// Errors produced while issuing or verifying credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Input is not a structurally valid credential.
    #[error("Malformed credential: {0}")]
    Malformed(String),

    /// Signature does not verify against the configured key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// `now >= exp`.
    #[error("Credential expired")]
    Expired,

    /// The `iss` claim does not match the configured issuer.
    #[error("Issuer mismatch")]
    IssuerMismatch,

    /// Expired for longer than the configured refresh window.
    #[error("Refresh window elapsed")]
    RefreshWindowElapsed,

    /// The cryptographic signing operation failed.
    #[error("Failed to sign credential: {0}")]
    Signing(String),

    /// Authenticator settings are unusable.
    #[error("Invalid authenticator configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable, low-cardinality label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "malformed",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::Expired => "expired",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::RefreshWindowElapsed => "refresh_window_elapsed",
            AuthError::Signing(_) => "signing",
            AuthError::Config(_) => "config",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                AuthError::InvalidSignature
            }
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
            ErrorKind::InvalidToken => AuthError::Malformed("invalid JWT structure".into()),
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::Malformed(format!("missing claim: {claim}"))
            }
            _ => AuthError::Malformed(err.to_string()),
        }
    }
}

/// Result type alias for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::{Error as JwtError, ErrorKind};

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::Expired.to_string(), "Credential expired");
        assert_eq!(
            AuthError::Malformed("bad".into()).to_string(),
            "Malformed credential: bad"
        );
    }

    #[test]
    fn test_from_jsonwebtoken_signature() {
        let err: AuthError = JwtError::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn test_from_jsonwebtoken_structure() {
        let err: AuthError = JwtError::from(ErrorKind::InvalidToken).into();
        assert!(matches!(err, AuthError::Malformed(_)));

        let err: AuthError = JwtError::from(ErrorKind::MissingRequiredClaim("exp".into())).into();
        assert_eq!(err.to_string(), "Malformed credential: missing claim: exp");
    }

    #[test]
    fn test_from_jsonwebtoken_issuer() {
        let err: AuthError = JwtError::from(ErrorKind::InvalidIssuer).into();
        assert!(matches!(err, AuthError::IssuerMismatch));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(AuthError::Expired.kind(), "expired");
        assert_eq!(AuthError::InvalidSignature.kind(), "invalid_signature");
        assert_eq!(AuthError::Malformed(String::new()).kind(), "malformed");
    }
}
