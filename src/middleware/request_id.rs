//! Request correlation ids.
//!
//! Every request gets an `X-Request-Id`: the caller's own if it is usable,
//! otherwise a fresh UUIDv4. The id is echoed on the response, stored in the
//! request extensions as [`RequestId`] (where the HTTP trace span picks it
//! up), so a rejected credential or an exhausted quota can be traced back to
//! the client's call.
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" http://localhost:9000/health
//! ```
//!
//! Caller-supplied ids longer than [`MAX_REQUEST_ID_LEN`] or containing
//! anything but visible ASCII are replaced, since they end up in log lines.

use std::fmt;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

/// Header carrying the request id in both directions.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest caller-supplied id that is kept as is.
pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of the request being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied id if it is safe to log.
    fn from_header(value: &HeaderValue) -> Option<Self> {
        let value = value.to_str().ok()?;
        let usable = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value.bytes().all(|b| b.is_ascii_graphic());
        usable.then(|| Self(value.to_string()))
    }

    fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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
        let request_id = req
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(RequestId::from_header)
            .unwrap_or_else(RequestId::generate);

        if let Some(value) = request_id.header_value() {
            req.headers_mut().insert(REQUEST_ID_HEADER.clone(), value);
        }
        req.extensions_mut().insert(request_id.clone());

        debug!(request_id = %request_id, "Processing request");

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            if let Some(value) = request_id.header_value() {
                response
                    .headers_mut()
                    .insert(REQUEST_ID_HEADER.clone(), value);
            }

            Ok(response)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    async fn echo_id(req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let id = req
            .extensions()
            .get::<RequestId>()
            .map(|id| id.to_string())
            .unwrap_or_default();
        Ok(Response::new(Body::from(id)))
    }

    async fn call(req: Request<Body>) -> (String, String) {
        let response = RequestIdLayer::new()
            .layer(tower::service_fn(echo_id))
            .oneshot(req)
            .await
            .unwrap();
        let header = response.headers()[&REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (header, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_propagates_existing_id() {
        let req = Request::builder()
            .header("x-request-id", "existing-id-123")
            .body(Body::empty())
            .unwrap();

        let (header, seen_by_handler) = call(req).await;
        assert_eq!(header, "existing-id-123");
        assert_eq!(seen_by_handler, "existing-id-123");
    }

    #[tokio::test]
    async fn test_generates_uuid_when_absent() {
        let req = Request::builder().body(Body::empty()).unwrap();

        let (header, seen_by_handler) = call(req).await;
        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(header, seen_by_handler);
    }

    #[tokio::test]
    async fn test_replaces_unusable_id() {
        let req = Request::builder()
            .header("x-request-id", "a".repeat(MAX_REQUEST_ID_LEN + 1))
            .body(Body::empty())
            .unwrap();

        let (header, _) = call(req).await;
        assert!(Uuid::parse_str(&header).is_ok());
    }

    #[test]
    fn test_from_header_rejects_spaces() {
        let value = HeaderValue::from_static("has spaces");
        assert!(RequestId::from_header(&value).is_none());
    }
}
