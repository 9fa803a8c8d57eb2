//! Security response headers.
//!
//! When enabled, every response carries:
//!
//! | Header | Value |
//! |---|---|
//! | `X-Content-Type-Options` | `nosniff` |
//! | `X-Frame-Options` | `DENY` |
//! | `X-XSS-Protection` | `1; mode=block` |
//! | `Referrer-Policy` | `strict-origin-when-cross-origin` |
//! | `Content-Security-Policy` | `default-src 'self'` |
//! | `Strict-Transport-Security` | `max-age=<n>; includeSubDomains` (HTTPS only) |
//!
//! A request counts as HTTPS when its URI scheme is `https` or a fronting
//! proxy sent `X-Forwarded-Proto: https`.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Request, Response};
use tower::{Layer, Service};

const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_XSS_PROTECTION: &str = "x-xss-protection";

fn static_headers() -> [(HeaderName, HeaderValue); 5] {
    [
        (
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ),
        (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
        (
            HeaderName::from_static(X_XSS_PROTECTION),
            HeaderValue::from_static("1; mode=block"),
        ),
        (
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ),
        (
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'self'"),
        ),
    ]
}

/// Security headers layer.
#[derive(Clone)]
pub struct SecurityHeadersLayer {
    enabled: bool,
    hsts: Option<HeaderValue>,
}

impl SecurityHeadersLayer {
    /// Create the layer. `hsts_max_age` is in seconds.
    pub fn new(enabled: bool, hsts_max_age: u64) -> Self {
        let hsts = HeaderValue::from_str(&format!("max-age={hsts_max_age}; includeSubDomains")).ok();
        Self { enabled, hsts }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    layer: SecurityHeadersLayer,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        if !self.layer.enabled {
            return Box::pin(inner.call(req));
        }

        let hsts = if is_https(&req) {
            self.layer.hsts.clone()
        } else {
            None
        };

        Box::pin(async move {
            let mut response = inner.call(req).await?;
            let headers = response.headers_mut();
            for (name, value) in static_headers() {
                headers.insert(name, value);
            }
            if let Some(hsts) = hsts {
                headers.insert(header::STRICT_TRANSPORT_SECURITY, hsts);
            }
            Ok(response)
        })
    }
}

fn is_https<B>(req: &Request<B>) -> bool {
    if req.uri().scheme_str() == Some("https") {
        return true;
    }
    req.headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}
