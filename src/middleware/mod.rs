//! HTTP middleware for protection, security and observability.
//!
//! - **Rate Limiting**: Keyed token bucket, sliding window or fixed window
//! - **Security Headers**: nosniff, frame denial, CSP and HSTS over HTTPS
//! - **Panic Recovery**: Handler panics become JSON 500 responses
//! - **API Caller**: User agent and API version in request extensions
//! - **Request ID**: Request, correlation and trace ID propagation
//!
//! # Architecture
//!
//! ```text
//! Request → Request ID → Panic → Rate Limiter → Security → CORS → Trace → API Caller → Handler
//!              ↓           ↓          ↓
//!       X-Request-ID     500     429 Too Many
//! ```

pub mod api_caller;
pub mod ip;
pub mod panic;
pub mod rate_limit;
pub mod request_id;
pub mod security;

pub use api_caller::{ApiCaller, api_caller};
pub use ip::{UNKNOWN_IP, extract_client_ip};
pub use panic::PanicRecoveryLayer;
pub use rate_limit::{
    Algorithm, Decision, KeyExtractor, Limiter, RateLimitConfig, RateLimitLayer,
    create_limiter, extract_key,
};
pub use request_id::{RequestContext, RequestIdExt, RequestIdLayer};
pub use security::SecurityHeadersLayer;
