//! HS256 credential issuance and verification.
//!
//! Verification is stateless: any instance holding the shared key can check
//! any credential without coordination. The trade-off is that credentials
//! cannot be revoked before they expire.
//!
//! # Validity
//!
//! ```text
//! issued ──► valid (now < exp) ──► expired (now >= exp)
//! ```
//!
//! There is no transition back to `valid`. A caller wanting continuity issues
//! a new credential, using [`TokenAuthenticator::verify_for_refresh`] to decide
//! whether an expired one is still eligible.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use super::claims::{CLAIMS_VERSION, Claims};
use super::error::{AuthError, AuthResult};
use crate::metrics;

/// Default credential lifetime (1 hour).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default refresh window after expiry (12 hours).
pub const DEFAULT_MAX_REFRESH: Duration = Duration::from_secs(12 * 60 * 60);

/// Settings consumed by [`TokenAuthenticator::new`].
#[derive(Clone)]
pub struct JwtSettings {
    /// Issuer written to and required in every credential.
    pub issuer: String,
    /// Realm announced in `WWW-Authenticate` challenges.
    pub realm: String,
    /// HMAC secret shared by every instance.
    pub key: Vec<u8>,
    /// Credential lifetime.
    pub timeout: Duration,
    /// How long after expiry a credential may still be exchanged.
    pub max_refresh: Duration,
}

impl JwtSettings {
    pub fn new(issuer: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            issuer: issuer.into(),
            realm: String::new(),
            key: key.into(),
            timeout: DEFAULT_TIMEOUT,
            max_refresh: DEFAULT_MAX_REFRESH,
        }
    }
}

impl fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSettings")
            .field("issuer", &self.issuer)
            .field("realm", &self.realm)
            .field("key", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_refresh", &self.max_refresh)
            .finish()
    }
}

/// A freshly signed credential.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies signed, time-bounded credentials.
///
/// Read-only after construction; share it behind an `Arc`.
pub struct TokenAuthenticator {
    issuer: String,
    realm: String,
    timeout: Duration,
    max_refresh: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenAuthenticator {
    /// Build an authenticator from validated settings.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the issuer or key is empty.
    pub fn new(settings: JwtSettings) -> AuthResult<Self> {
        if settings.issuer.is_empty() {
            return Err(AuthError::Config("issuer is required".to_string()));
        }
        if settings.key.is_empty() {
            return Err(AuthError::Config("signing key is required".to_string()));
        }

        // Expiry is checked against an injectable clock in `check_claims`.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_issuer(&[settings.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&settings.key),
            decoding_key: DecodingKey::from_secret(&settings.key),
            issuer: settings.issuer,
            realm: settings.realm,
            timeout: settings.timeout,
            max_refresh: settings.max_refresh,
            validation,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_refresh(&self) -> Duration {
        self.max_refresh
    }

    /// Issue a credential for `subject` with `role`, valid from now.
    ///
    /// `subject` must be non-empty; this is the caller's contract and is not
    /// checked here. An empty `role` yields an anonymous-tier credential.
    pub fn issue(&self, subject: &str, role: &str) -> AuthResult<IssuedToken> {
        self.issue_at(subject, role, Utc::now())
    }

    /// Issue a credential as if the current time were `now`.
    pub fn issue_at(&self, subject: &str, role: &str, now: DateTime<Utc>) -> AuthResult<IssuedToken> {
        let claims = Claims::new(subject, role, &self.issuer, now, self.timeout);
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        debug!(subject, role = claims.tier(), exp = claims.exp, "Issued credential");
        metrics::record_token_issued();

        Ok(IssuedToken {
            token,
            expires_at: claims.expires_at(),
        })
    }

    /// Verify a presented credential and return its claims.
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify a credential as if the current time were `now`.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the input is not a structurally valid credential
    /// - `InvalidSignature` if the signature does not verify
    /// - `IssuerMismatch` if `iss` differs from the configured issuer
    /// - `Expired` if `now >= exp`
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let claims = self.decode_claims(token)?;
        if !claims.is_valid_at(now) {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    /// Verify a credential for exchange, tolerating expiry up to `max_refresh`.
    ///
    /// Does not reissue anything; the caller decides what to do with the
    /// returned claims.
    pub fn verify_for_refresh(&self, token: &str) -> AuthResult<Claims> {
        self.verify_for_refresh_at(token, Utc::now())
    }

    pub fn verify_for_refresh_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let claims = self.decode_claims(token)?;
        if now >= claims.refresh_deadline(self.max_refresh) {
            return Err(AuthError::RefreshWindowElapsed);
        }
        Ok(claims)
    }

    /// Signature, issuer and schema checks shared by every verification path.
    fn decode_claims(&self, token: &str) -> AuthResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        if claims.ver != CLAIMS_VERSION {
            return Err(AuthError::Malformed(format!(
                "unsupported claims version {}",
                claims.ver
            )));
        }

        Ok(claims)
    }
}

impl fmt::Debug for TokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthenticator")
            .field("issuer", &self.issuer)
            .field("realm", &self.realm)
            .field("timeout", &self.timeout)
            .field("max_refresh", &self.max_refresh)
            .finish_non_exhaustive()
    }
}
