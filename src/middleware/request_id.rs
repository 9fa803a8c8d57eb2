//! Request and correlation ID middleware for distributed tracing.
//!
//! # Features
//!
//! - Propagates an incoming `X-Request-ID`, or generates a new one
//! - Derives a correlation ID from `X-Correlation-ID`, then `X-Trace-ID`,
//!   then `X-Request-ID`, generating one when none is present
//! - Carries an upstream `X-Trace-ID` through unchanged
//! - Stores a [`RequestContext`] in request extensions for handlers
//! - Echoes the IDs on every response, including recovered panics
//!
//! Generated IDs are 128-bit random values rendered as 32 hex characters.
//!
//! # Client Usage
//!
//! ```bash
//! curl -H "X-Correlation-ID: checkout-7f3a" http://localhost:8080/hello
//! ```
//!
//! The same correlation ID is returned in the response.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{HeaderMap, Request, Response};
use tower::{Layer, Service};
use tracing::debug;
use uuid::Uuid;

/// Header carrying the per-hop request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header carrying the end-to-end correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Header carrying an upstream trace ID.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Identifiers attached to a single request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RequestContext {
    pub request_id: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl RequestContext {
    /// Build the context for an incoming request.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let request_id = header(headers, REQUEST_ID_HEADER).unwrap_or_else(generate_id);
        let trace_id = header(headers, TRACE_ID_HEADER);
        let correlation_id = header(headers, CORRELATION_ID_HEADER)
            .or_else(|| trace_id.clone())
            .or_else(|| header(headers, REQUEST_ID_HEADER))
            .unwrap_or_else(generate_id);

        Self {
            request_id,
            correlation_id,
            trace_id,
        }
    }

    fn write_headers(&self, headers: &mut HeaderMap) {
        insert(headers, CORRELATION_ID_HEADER, &self.correlation_id);
        insert(headers, REQUEST_ID_HEADER, &self.request_id);
        if let Some(trace_id) = &self.trace_id {
            insert(headers, TRACE_ID_HEADER, trace_id);
        }
    }
}

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    /// Create a new request ID layer.
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
        let ctx = RequestContext::from_headers(req.headers());

        // Downstream handlers see the resolved IDs in headers and extensions
        ctx.write_headers(req.headers_mut());
        req.extensions_mut().insert(ctx.clone());

        debug!(
            request_id = %ctx.request_id,
            correlation_id = %ctx.correlation_id,
            "Processing request"
        );

        // Take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            ctx.write_headers(response.headers_mut());
            Ok(response)
        })
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Extension trait to read request identifiers from requests.
pub trait RequestIdExt {
    /// Context stored by [`RequestIdLayer`], if the layer ran.
    fn request_context(&self) -> Option<&RequestContext>;

    /// Get the request ID from the request headers.
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_context(&self) -> Option<&RequestContext> {
        self.extensions().get::<RequestContext>()
    }

    fn request_id(&self) -> Option<String> {
        header(self.headers(), REQUEST_ID_HEADER)
    }
}
