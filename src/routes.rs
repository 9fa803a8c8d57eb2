//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-ID / X-Correlation-ID / X-Trace-ID
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Panic Recovery   │ ← 500 JSON on handler panic
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← nosniff, DENY, CSP, HSTS over HTTPS
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Cross-origin headers
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Timeouts      │ ← 408 past SERVER_WRITE_TIMEOUT, body reads bounded by SERVER_READ_TIMEOUT
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   API Caller     │ ← User-Agent / APIVersion extension
//! └────────┬─────────┘
//!          ▼
//!  Custom middleware
//!          ▼
//!      Handler
//! ```
//!
//! # Built-in Routes
//!
//! - `/healthz` - Registered health checks
//! - `/version` - Build information
//!
//! Unmatched paths get a JSON 404.

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, Method, StatusCode};
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::api::Api;
use crate::handlers;
use crate::middleware::{
    PanicRecoveryLayer, RateLimitLayer, RequestIdLayer, SecurityHeadersLayer, api_caller,
};
use crate::state::AppState;

/// Caller-supplied middleware, applied inside the built-in stack.
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

const CORS_ALLOWED_HEADERS: [&str; 12] = [
    "origin",
    "accept",
    "authorization",
    "content-type",
    "x-api-key",
    "user-agent",
    "referer",
    "accept-encoding",
    "accept-language",
    "sec-fetch-dest",
    "sec-fetch-mode",
    "sec-fetch-site",
];

/// Build the application router with all routes and middleware configured.
///
/// # Arguments
///
/// * `state` - Configuration, version info and health checks
/// * `apis` - Route groups to mount
/// * `custom` - Extra middleware, applied in order (first is outermost)
///
/// # Returns
///
/// Fully configured Axum router ready to be served.
pub fn build_router(state: AppState, apis: &[Arc<dyn Api>], custom: &[Middleware]) -> Router {
    let config = Arc::clone(&state.config);

    // =========================================================================
    // Build Router with Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/version", get(handlers::version))
        .fallback(handlers::not_found)
        .with_state(state);

    for api in apis {
        debug!(api = api.name(), "Mounting API routes");
        router = router.merge(api.router());
    }

    // =========================================================================
    // Apply Middleware Stack (order matters - last applied runs first)
    // =========================================================================

    // Custom middleware sits closest to the handlers
    for middleware in custom.iter().rev() {
        router = middleware(router);
    }

    router = router.layer(axum::middleware::from_fn(api_caller));

    // A zero timeout disables the corresponding layer
    if !config.read_timeout.is_zero() {
        router = router.layer(RequestBodyTimeoutLayer::new(config.read_timeout));
    }
    if !config.write_timeout.is_zero() {
        router = router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.write_timeout,
        ));
    }

    router = router
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_allowed_origins))
        .layer(SecurityHeadersLayer::new(
            config.security_headers,
            config.hsts_max_age,
        ));

    router
        .layer(RateLimitLayer::new(config.rate_limit_config()))
        .layer(PanicRecoveryLayer::new())
        .layer(RequestIdLayer::new())
}

/// Build CORS layer from configuration.
///
/// Origins are validated by `Config::validate` (no wildcard, explicit
/// scheme); entries that still fail to parse as header values are skipped.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(CORS_ALLOWED_HEADERS.map(HeaderName::from_static))
}
