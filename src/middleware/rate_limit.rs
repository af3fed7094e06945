//! Per-client rate limiting middleware backed by a shared quota store.
//!
//! # Algorithm
//!
//! Fixed window counting (see [`crate::rate_limit`]). Every request consumes
//! one unit from the bucket `"<scope>:<client ip>"`. Once the window's quota
//! is spent, requests are rejected until the window expires. Because the
//! counters live in the store, replicas sharing a store enforce one quota.
//!
//! # Response Headers
//!
//! On every response that went through a decision:
//! - `X-RateLimit-Limit`: Quota for the window
//! - `X-RateLimit-Remaining`: Requests left in the current window
//! - `X-RateLimit-Reset`: Seconds until the window replenishes
//!
//! On rate limit exceeded (429), additionally:
//! - `Retry-After`: Seconds until the next request will be accepted
//!
//! # Store Failures
//!
//! If the store cannot be consulted within its timeout the request fails
//! closed with a 500. It is never admitted without a decision.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, resolve_client_ip};
use crate::error::{AppError, ErrorResponse};
use crate::metrics;
use crate::rate_limit::{Decision, Rate, RateLimiter};

pub static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
/// let layer = RateLimitLayer::new(limiter, Rate::per_minute(NonZeroU32::new(60).unwrap()), "ipRateLimit");
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
    rate: Rate,
    scope: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter, rate: Rate, scope: impl Into<Arc<str>>) -> Self {
        Self {
            limiter,
            rate,
            scope: scope.into(),
            trusted_proxies: Arc::new(TrustedProxyConfig::default()),
        }
    }

    /// Restrict which peers may supply `X-Forwarded-For`.
    pub fn with_trusted_proxies(mut self, trusted_proxies: Arc<TrustedProxyConfig>) -> Self {
        self.trusted_proxies = trusted_proxies;
        self
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            rate: self.rate,
            scope: self.scope.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
    rate: Rate,
    scope: Arc<str>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let rate = self.rate;
        let scope = self.scope.clone();
        let mut inner = self.inner.clone();

        let client_ip = resolve_client_ip(&req, &self.trusted_proxies).into_owned();

        Box::pin(async move {
            let decision = match limiter.allow(&scope, &client_ip, rate).await {
                Ok(decision) => decision,
                Err(e) => {
                    metrics::record_rate_limit_decision(&scope, "error");
                    warn!(
                        client_ip = %client_ip,
                        path = %req.uri().path(),
                        error = %e,
                        "Rejecting request, rate limit store unavailable"
                    );
                    return Ok(AppError::RateLimit(e).into_response());
                }
            };

            if !decision.allowed {
                metrics::record_rate_limit_decision(&scope, "denied");
                let retry_after = decision.reset_after_secs().max(1);
                warn!(
                    client_ip = %client_ip,
                    path = %req.uri().path(),
                    retry_after_secs = retry_after,
                    "Rate limit exceeded for IP"
                );

                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(ErrorResponse::new(
                        "too_many_requests",
                        "Rate limit exceeded. Please retry later.",
                    )),
                )
                    .into_response();
                insert_quota_headers(response.headers_mut(), &decision);
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after));
                return Ok(response);
            }

            metrics::record_rate_limit_decision(&scope, "allowed");
            debug!(
                client_ip = %client_ip,
                remaining = decision.remaining,
                "Request admitted"
            );

            let mut response = inner.call(req).await?;
            insert_quota_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
    headers.insert(
        X_RATELIMIT_REMAINING.clone(),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        X_RATELIMIT_RESET.clone(),
        HeaderValue::from(decision.reset_after_secs()),
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::rate_limit::{MemoryStore, QuotaStore, StoreError, WindowState};
    use async_trait::async_trait;
    use std::convert::Infallible;
    use std::num::NonZeroU32;
    use std::time::Duration;
    use tower::ServiceExt;

    struct DownStore;

    #[async_trait]
    impl QuotaStore for DownStore {
        async fn acquire(
            &self,
            _key: &str,
            _limit: u32,
            _window: Duration,
        ) -> Result<WindowState, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn backend(&self) -> &'static str {
            "down"
        }
    }

    fn layer_with(store: Arc<dyn QuotaStore>, limit: u32) -> RateLimitLayer {
        RateLimitLayer::new(
            RateLimiter::new(store),
            Rate::per_minute(NonZeroU32::new(limit).unwrap()),
            "ipRateLimit",
        )
    }

    async fn ok(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
        Ok(Response::new(Body::from("ok")))
    }

    fn request_from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/me")
            .header("x-real-ip", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_headers() {
        let service = layer_with(Arc::new(MemoryStore::new()), 60).layer(tower::service_fn(ok));

        let response = service.oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
        assert_eq!(response.headers()["x-ratelimit-reset"], "60");
    }

    #[tokio::test]
    async fn test_rejects_after_quota() {
        let layer = layer_with(Arc::new(MemoryStore::new()), 2);
        let service = layer.layer(tower::service_fn(ok));

        for _ in 0..2 {
            let response = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = service.oneshot(request_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        let retry_after: u64 = response.headers()[RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry_after));
    }

    #[tokio::test]
    async fn test_clients_have_independent_quotas() {
        let service = layer_with(Arc::new(MemoryStore::new()), 1).layer(tower::service_fn(ok));

        let first = service.clone().oneshot(request_from("10.0.0.1")).await.unwrap();
        let second = service.clone().oneshot(request_from("10.0.0.2")).await.unwrap();
        let again = service.oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let service = layer_with(Arc::new(DownStore), 60).layer(tower::service_fn(ok));

        let response = service.oneshot(request_from("10.0.0.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    #[test]
    fn test_layer_accessors() {
        let layer = layer_with(Arc::new(MemoryStore::new()), 60);
        assert_eq!(layer.scope(), "ipRateLimit");
        assert_eq!(layer.rate().limit(), 60);
    }
}
