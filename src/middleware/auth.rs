//! Bearer credential authentication middleware.
//!
//! # Behaviour
//!
//! - Reads `Authorization: Bearer <token>` and verifies it with the shared
//!   [`TokenAuthenticator`]
//! - On success the decoded [`Claims`] are inserted into the request
//!   extensions, so handlers can take `Extension<Claims>`
//! - On failure the response is a 401 with
//!   `WWW-Authenticate: Bearer realm="<realm>"` and one fixed body, whatever
//!   the reason. The reason is only logged and counted.
//!
//! # Usage
//!
//! ```bash
//! curl -H "Authorization: Bearer $TOKEN" http://localhost:9000/me
//! ```
//!
//! # Bypassed Endpoints
//!
//! Paths in `AUTH_BYPASS_PATHS` (default `/health`, `/ready`, `/auth/refresh`)
//! skip authentication. Matching is exact against `request.uri().path()`:
//! `/health/` and `/HEALTH` are **not** bypassed.
//!
//! # Brute Force Protection
//!
//! Failed attempts are counted per client IP. Once a client exceeds
//! `AUTH_FAILURE_LIMIT_PER_MINUTE`, its further failures are answered with
//! 429 instead of 401 until the quota replenishes. Valid credentials are never
//! blocked. The counter is an [`AuthFailureLimiter`] held in the app state, so
//! `/auth/refresh` failures draw from the same budget.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request, Response};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tower::{Layer, Service};
use tracing::{debug, error, warn};

use super::ip::{TrustedProxyConfig, resolve_client_ip};
use crate::auth::{Claims, TokenAuthenticator};
use crate::error::AppError;
use crate::metrics;

/// Authentication scheme accepted in the `Authorization` header.
pub const BEARER_SCHEME: &str = "Bearer";

/// Outcome label for requests that carry no credential at all.
pub(crate) const MISSING_CREDENTIAL: &str = "missing";

/// Counts failed authentication attempts per client IP.
///
/// Shared by the auth layer and any handler that checks credentials itself,
/// so every route draws from the same per-client budget. Idle clients are
/// dropped by [`prune`](Self::prune), which the state's maintenance task calls
/// periodically.
pub struct AuthFailureLimiter {
    limiter: RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>,
}

impl AuthFailureLimiter {
    pub fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// `per_minute` failures per client; `None` when zero (disabled).
    pub fn per_minute(per_minute: u32) -> Option<Self> {
        NonZeroU32::new(per_minute).map(|limit| Self::new(Quota::per_minute(limit)))
    }

    /// Record one failure for `client_ip`.
    ///
    /// # Errors
    ///
    /// `AppError::TooManyAttempts` once the client is over its budget.
    pub fn record_failure(&self, client_ip: &str) -> Result<(), AppError> {
        let key = client_ip.to_string();
        self.limiter.check_key(&key).map_err(|not_until| {
            let retry_after_secs = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            error!(
                client_ip,
                retry_after_secs, "IP blocked due to excessive auth failures"
            );
            AppError::TooManyAttempts { retry_after_secs }
        })
    }

    /// Forget clients whose budget has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of clients currently tracked.
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

/// Turn a credential failure into the response the client sees.
///
/// Throttled clients get 429, everyone else the uniform 401.
pub(crate) fn reject(
    failure_limiter: Option<&AuthFailureLimiter>,
    client_ip: &str,
    realm: &str,
    kind: &'static str,
) -> AppError {
    if let Some(limiter) = failure_limiter
        && let Err(throttled) = limiter.record_failure(client_ip)
    {
        return throttled;
    }
    AppError::Unauthenticated {
        realm: realm.to_string(),
        kind,
    }
}

/// Bearer credential authentication layer.
///
/// # Example
///
/// ```rust,ignore
/// let auth = BearerAuthLayer::new(authenticator, vec!["/health".into()])
///     .with_failure_limit(10);
/// let app = Router::new().route("/me", get(me)).layer(auth);
/// ```
#[derive(Clone)]
pub struct BearerAuthLayer {
    authenticator: Arc<TokenAuthenticator>,
    bypass_paths: Arc<Vec<String>>,
    failure_limiter: Option<Arc<AuthFailureLimiter>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl BearerAuthLayer {
    /// Create a layer with no failure limit.
    pub fn new(authenticator: Arc<TokenAuthenticator>, bypass_paths: Vec<String>) -> Self {
        Self {
            authenticator,
            bypass_paths: Arc::new(bypass_paths),
            failure_limiter: None,
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    /// Answer with 429 once a client has failed more than `per_minute` times
    /// in a minute. Zero disables the limit.
    pub fn with_failure_limit(mut self, per_minute: u32) -> Self {
        self.failure_limiter = AuthFailureLimiter::per_minute(per_minute).map(Arc::new);
        self
    }

    /// Count failures in a limiter shared with other routes.
    pub fn with_failure_limiter(mut self, failure_limiter: Option<Arc<AuthFailureLimiter>>) -> Self {
        self.failure_limiter = failure_limiter;
        self
    }

    /// Restrict which peers may supply `X-Forwarded-For`.
    pub fn with_trusted_proxies(mut self, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            authenticator: self.authenticator.clone(),
            bypass_paths: self.bypass_paths.clone(),
            failure_limiter: self.failure_limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Bearer credential authentication service wrapper.
#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    authenticator: Arc<TokenAuthenticator>,
    bypass_paths: Arc<Vec<String>>,
    failure_limiter: Option<Arc<AuthFailureLimiter>>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for BearerAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let authenticator = self.authenticator.clone();
        let bypass_paths = self.bypass_paths.clone();
        let failure_limiter = self.failure_limiter.clone();
        let trusted_proxies = self.trusted_proxies.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path();
            if bypass_paths.iter().any(|p| p == path) {
                debug!(path, "Bypassing auth");
                return inner.call(req).await;
            }

            let outcome = match bearer_token(req.headers()) {
                Some(token) => authenticator.verify(token).map_err(|e| e.kind()),
                None => Err(MISSING_CREDENTIAL),
            };

            match outcome {
                Ok(claims) => {
                    metrics::record_auth_verification("ok");
                    debug!(subject = %claims.sub, tier = claims.tier(), "Credential verified");
                    req.extensions_mut().insert::<Claims>(claims);
                    inner.call(req).await
                }
                Err(kind) => {
                    metrics::record_auth_verification(kind);
                    let client_ip = resolve_client_ip(&req, &trusted_proxies).into_owned();
                    warn!(
                        kind,
                        path = %req.uri().path(),
                        client_ip = %client_ip,
                        "Authentication failed"
                    );

                    Ok(reject(
                        failure_limiter.as_deref(),
                        &client_ip,
                        authenticator.realm(),
                        kind,
                    )
                    .into_response())
                }
            }
        })
    }
}

/// Extract the credential from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. Anything else is treated as
/// no credential.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case(BEARER_SCHEME) && !token.is_empty()).then_some(token)
}
