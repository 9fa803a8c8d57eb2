//! Caller metadata for handlers.

use axum::extract::{FromRequestParts, Request};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use serde::Serialize;

/// Header clients use to pin an API version.
pub const API_VERSION_HEADER: &str = "apiversion";

/// Who is calling: user agent and requested API version.
///
/// Absent headers become empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiCaller {
    pub user_agent: String,
    pub api_version: String,
}

impl ApiCaller {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        Self {
            user_agent: get(USER_AGENT.as_str()),
            api_version: get(API_VERSION_HEADER),
        }
    }
}

/// Middleware storing an [`ApiCaller`] in request extensions.
pub async fn api_caller(mut req: Request, next: Next) -> Response {
    let caller = ApiCaller::from_headers(req.headers());
    req.extensions_mut().insert(caller);
    next.run(req).await
}

impl<S> FromRequestParts<S> for ApiCaller
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ApiCaller>()
            .cloned()
            .unwrap_or_else(|| ApiCaller::from_headers(&parts.headers)))
    }
}
