//! Credential endpoints.
//!
//! - `GET /me` - The verified claims of the caller (behind the auth layer)
//! - `POST /auth/refresh` - Exchange a credential for a fresh one
//!
//! `/auth/refresh` is in the default bypass list: it checks the presented
//! credential itself with [`TokenAuthenticator::verify_for_refresh`], which
//! accepts credentials up to `JWT_MAX_REFRESH_SECS` past expiry. Its failures
//! count against the same per-client budget as the auth layer's.
//!
//! [`TokenAuthenticator::verify_for_refresh`]: crate::auth::TokenAuthenticator::verify_for_refresh

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::auth::Claims;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::auth::{MISSING_CREDENTIAL, bearer_token, reject};
use crate::middleware::resolve_client_ip;
use crate::models::{MeResponse, TokenResponse};
use crate::state::AppState;

/// Return the identity carried by the caller's credential.
///
/// Requires the auth layer; without it there are no claims to extract and
/// the request fails with 500.
#[instrument(skip_all)]
pub async fn me(Extension(claims): Extension<Claims>) -> Json<MeResponse> {
    Json(MeResponse::from(&claims))
}

/// Issue a new credential for the subject and role of the presented one.
///
/// # Response Body
///
/// ```json
/// {
///   "token": "eyJhbGciOiJIUzI1NiJ9...",
///   "token_type": "Bearer",
///   "expires_at": "2024-01-15T11:30:00Z",
///   "expires_in": 3600
/// }
/// ```
///
/// # Errors
///
/// 401 for any credential failure, 429 once the client has failed too often.
#[instrument(skip_all)]
pub async fn refresh_token(
    State(state): State<AppState>,
    req: Request<Body>,
) -> AppResult<Json<TokenResponse>> {
    let authenticator = &state.authenticator;
    let now = Utc::now();

    let verified = match bearer_token(req.headers()) {
        Some(token) => authenticator
            .verify_for_refresh_at(token, now)
            .map_err(|e| e.kind()),
        None => Err(MISSING_CREDENTIAL),
    };

    let claims = match verified {
        Ok(claims) => claims,
        Err(kind) => {
            metrics::record_auth_verification(kind);
            let client_ip = resolve_client_ip(&req, &state.trusted_proxies);
            warn!(kind, client_ip = %client_ip, "Refresh rejected");
            return Err(reject(
                state.failure_limiter.as_deref(),
                &client_ip,
                authenticator.realm(),
                kind,
            ));
        }
    };
    metrics::record_auth_verification("ok");

    let issued = authenticator
        .issue_at(&claims.sub, claims.role.as_deref().unwrap_or_default(), now)
        .map_err(|e| AppError::Internal(e.to_string()))?;

    info!(subject = %claims.sub, "Credential refreshed");
    Ok(Json(TokenResponse::new(issued, now)))
}
