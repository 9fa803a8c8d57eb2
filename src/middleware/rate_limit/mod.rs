//! Keyed rate limiting middleware.
//!
//! # Algorithms
//!
//! Three interchangeable [`Limiter`] implementations, selected by
//! [`Algorithm`]:
//!
//! - **Token bucket** (default): continuous refill at `requests / window`,
//!   capacity `burst` (or `requests` when burst is 0)
//! - **Sliding window**: exact count of admissions in the trailing window
//! - **Fixed window**: per-key counter reset when the window expires
//!
//! Every limiter owns its per-key state exclusively. State is sharded by
//! key so concurrent calls for the same key are linearized while distinct
//! keys mostly proceed in parallel.
//!
//! # Key Extraction
//!
//! See [`extract_key`]: by client IP, by a request header, or by a
//! caller-supplied function. Extraction never fails; every path ends in a
//! usable key.
//!
//! # Response Headers
//!
//! On every request while enabled:
//! - `X-RateLimit-Limit`: configured request count
//! - `X-RateLimit-Window`: configured window (e.g. `1m0s`)
//!
//! On rate limit exceeded (429), additionally:
//! - `X-RateLimit-Retry-After`: whole seconds until a retry can succeed
//!
//! # Memory
//!
//! Per-key state is created on first sight and only removed by
//! [`Limiter::reset`]. Key cardinality is bounded by the client population,
//! which is an assumption about the deployment rather than something this
//! module enforces.

mod fixed_window;
mod key;
mod sliding_window;
mod state;
mod token_bucket;

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{info, warn};

pub use fixed_window::FixedWindowLimiter;
pub use key::extract_key;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

use crate::metrics;
use crate::utils::{ceil_secs, format_duration};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_WINDOW: &str = "x-ratelimit-window";
pub const X_RATELIMIT_RETRY_AFTER: &str = "x-ratelimit-retry-after";

/// Header consulted by [`KeyExtractor::Header`] unless configured otherwise.
pub const DEFAULT_KEY_HEADER: &str = "X-API-Key";

// =============================================================================
// Limiter Contract
// =============================================================================

/// Outcome of consulting a limiter for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Rejected; `wait` estimates how long until a retry can succeed.
    Denied { wait: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Suggested wait before retrying; zero when allowed.
    pub fn wait_time(&self) -> Duration {
        match self {
            Decision::Allowed => Duration::ZERO,
            Decision::Denied { wait } => *wait,
        }
    }
}

/// A keyed rate limiting algorithm.
///
/// Implementations must be safe for arbitrary concurrent callers. Two calls
/// for the same key are strictly ordered; neither may observe a lost update.
pub trait Limiter: Send + Sync + fmt::Debug {
    /// Admit or reject one request for `key` as of `now`.
    fn allow_at(&self, key: &str, now: Instant) -> Decision;

    /// Admit or reject one request for `key` as of the current instant.
    fn allow(&self, key: &str) -> Decision {
        self.allow_at(key, Instant::now())
    }

    /// Forget all state for `key`; its next request is treated as its first.
    fn reset(&self, key: &str);

    /// Number of keys currently holding state.
    fn tracked_keys(&self) -> usize;
}

// =============================================================================
// Configuration
// =============================================================================

/// Rate limiting algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::FixedWindow => "fixed_window",
        }
    }

    /// Parse an algorithm name, falling back to the default for anything
    /// unrecognized.
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "token_bucket" => Algorithm::TokenBucket,
            "sliding_window" => Algorithm::SlidingWindow,
            "fixed_window" => Algorithm::FixedWindow,
            other => {
                let fallback = Algorithm::default();
                warn!(
                    algorithm = %other,
                    fallback = fallback.as_str(),
                    "Unknown rate limit algorithm, using default"
                );
                fallback
            }
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the partition key is derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyExtractor {
    #[default]
    Ip,
    Header,
    Custom,
}

impl KeyExtractor {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyExtractor::Ip => "ip",
            KeyExtractor::Header => "header",
            KeyExtractor::Custom => "custom",
        }
    }

    /// Parse an extractor name, falling back to IP extraction for anything
    /// unrecognized.
    pub fn parse_lossy(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "ip" => KeyExtractor::Ip,
            "header" => KeyExtractor::Header,
            "custom" => KeyExtractor::Custom,
            other => {
                let fallback = KeyExtractor::default();
                warn!(
                    extractor = %other,
                    fallback = fallback.as_str(),
                    "Unknown rate limit key extractor, using default"
                );
                fallback
            }
        }
    }
}

impl fmt::Display for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied key function for [`KeyExtractor::Custom`].
pub type KeyFn = Arc<dyn Fn(&Request<Body>) -> String + Send + Sync>;

/// Rate limiting settings, fixed for the lifetime of the middleware.
///
/// # Example
///
/// ```rust,ignore
/// let config = RateLimitConfig::new(100, Duration::from_secs(60))
///     .with_algorithm(Algorithm::SlidingWindow)
///     .with_key_extractor(KeyExtractor::Header);
/// let layer = RateLimitLayer::new(config);
/// ```
#[derive(Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests admitted per window (must be > 0 when enabled)
    pub requests: u32,
    /// Window length (must be > 0 when enabled)
    pub window: Duration,
    /// Token bucket capacity; 0 means "same as `requests`"
    pub burst: u32,
    pub algorithm: Algorithm,
    pub key_extractor: KeyExtractor,
    /// Header read by [`KeyExtractor::Header`]
    pub header_name: String,
    pub custom_key_fn: Option<KeyFn>,
}

impl RateLimitConfig {
    /// Enabled configuration with defaults for everything else.
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            enabled: true,
            requests,
            window,
            ..Self::default()
        }
    }

    /// Configuration that turns the middleware into a pass-through.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_key_extractor(mut self, key_extractor: KeyExtractor) -> Self {
        self.key_extractor = key_extractor;
        self
    }

    pub fn with_header_name(mut self, header_name: impl Into<String>) -> Self {
        self.header_name = header_name.into();
        self
    }

    /// Use `f` to derive keys. Also switches the extractor to
    /// [`KeyExtractor::Custom`].
    pub fn with_custom_key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request<Body>) -> String + Send + Sync + 'static,
    {
        self.key_extractor = KeyExtractor::Custom;
        self.custom_key_fn = Some(Arc::new(f));
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests: 100,
            window: Duration::from_secs(60),
            burst: 0,
            algorithm: Algorithm::default(),
            key_extractor: KeyExtractor::default(),
            header_name: DEFAULT_KEY_HEADER.to_string(),
            custom_key_fn: None,
        }
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("enabled", &self.enabled)
            .field("requests", &self.requests)
            .field("window", &self.window)
            .field("burst", &self.burst)
            .field("algorithm", &self.algorithm)
            .field("key_extractor", &self.key_extractor)
            .field("header_name", &self.header_name)
            .field("custom_key_fn", &self.custom_key_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Instantiate the limiter named by `config.algorithm`.
pub fn create_limiter(config: &RateLimitConfig) -> Box<dyn Limiter> {
    match config.algorithm {
        Algorithm::TokenBucket => Box::new(TokenBucketLimiter::new(
            config.requests,
            config.window,
            config.burst,
        )),
        Algorithm::SlidingWindow => {
            Box::new(SlidingWindowLimiter::new(config.requests, config.window))
        }
        Algorithm::FixedWindow => Box::new(FixedWindowLimiter::new(config.requests, config.window)),
    }
}

// =============================================================================
// Tower Layer
// =============================================================================

/// Everything the service needs once rate limiting is enabled.
struct ActiveLimit {
    limiter: Box<dyn Limiter>,
    config: RateLimitConfig,
    limit_header: HeaderValue,
    window_header: HeaderValue,
}

/// Rate limiting layer for the Tower middleware stack.
///
/// A layer built from a disabled configuration is a pass-through: no
/// limiter is allocated and requests are forwarded untouched. An enabled
/// layer owns exactly one limiter shared by every service it produces.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(RateLimitConfig::new(100, Duration::from_secs(60)));
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    active: Option<Arc<ActiveLimit>>,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        if !config.enabled {
            info!("Rate limiting disabled");
            return Self { active: None };
        }

        info!(
            requests = config.requests,
            window = %format_duration(config.window),
            burst = config.burst,
            algorithm = %config.algorithm,
            key_extractor = %config.key_extractor,
            "Rate limiting enabled"
        );

        let window_text = format_duration(config.window);
        let active = ActiveLimit {
            limiter: create_limiter(&config),
            limit_header: HeaderValue::from(config.requests),
            window_header: HeaderValue::from_bytes(window_text.as_bytes())
                .unwrap_or_else(|_| HeaderValue::from(config.window.as_secs())),
            config,
        };

        Self {
            active: Some(Arc::new(active)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            active: self.active.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    active: Option<Arc<ActiveLimit>>,
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
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let Some(active) = self.active.clone() else {
            return Box::pin(inner.call(req));
        };

        let key = extract_key(&req, &active.config);
        let decision = active.limiter.allow(&key);
        let algorithm = active.config.algorithm.as_str();
        metrics::record_rate_limit_decision(algorithm, decision.is_allowed());
        metrics::record_tracked_keys(algorithm, active.limiter.tracked_keys());

        match decision {
            Decision::Allowed => Box::pin(async move {
                let mut response = inner.call(req).await?;
                let headers = response.headers_mut();
                headers.insert(X_RATELIMIT_LIMIT, active.limit_header.clone());
                headers.insert(X_RATELIMIT_WINDOW, active.window_header.clone());
                Ok(response)
            }),
            Decision::Denied { wait } => {
                let retry_after = ceil_secs(wait).max(1);

                warn!(
                    key = %key,
                    path = %req.uri().path(),
                    retry_after_secs = retry_after,
                    "Rate limit exceeded"
                );

                let response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    [
                        (X_RATELIMIT_LIMIT, active.limit_header.clone()),
                        (X_RATELIMIT_WINDOW, active.window_header.clone()),
                        (X_RATELIMIT_RETRY_AFTER, HeaderValue::from(retry_after)),
                    ],
                    format!(
                        "Rate limit exceeded. Try again in {}\n",
                        format_duration(wait)
                    ),
                )
                    .into_response();

                Box::pin(async move { Ok(response) })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use axum::Router;
    use axum::extract::ConnectInfo;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn app(config: RateLimitConfig) -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(RateLimitLayer::new(config))
    }

    fn request_from(peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        Request::builder()
            .uri("/test")
            .extension(ConnectInfo(addr))
            .body(Body::empty())
            .unwrap()
    }

    async fn status_of(app: &Router, req: Request<Body>) -> StatusCode {
        app.clone().oneshot(req).await.unwrap().status()
    }

    // ==========================================================================
    // Limiter Contract
    // ==========================================================================

    fn all_limiters(requests: u32, window: Duration) -> Vec<Box<dyn Limiter>> {
        [
            Algorithm::TokenBucket,
            Algorithm::SlidingWindow,
            Algorithm::FixedWindow,
        ]
        .into_iter()
        .map(|algorithm| {
            create_limiter(&RateLimitConfig::new(requests, window).with_algorithm(algorithm))
        })
        .collect()
    }

    #[test]
    fn test_exactly_n_allowed_then_denied() {
        for limiter in all_limiters(4, Duration::from_secs(1)) {
            let now = Instant::now();
            for _ in 0..4 {
                assert!(limiter.allow_at("k", now).is_allowed(), "{limiter:?}");
            }
            let denied = limiter.allow_at("k", now);
            assert!(!denied.is_allowed(), "{limiter:?}");
            assert!(denied.wait_time() > Duration::ZERO, "{limiter:?}");
        }
    }

    #[test]
    fn test_reset_restores_full_capacity_for_one_key() {
        for limiter in all_limiters(2, Duration::from_secs(60)) {
            let now = Instant::now();
            for key in ["a", "b"] {
                assert!(limiter.allow_at(key, now).is_allowed());
                assert!(limiter.allow_at(key, now).is_allowed());
                assert!(!limiter.allow_at(key, now).is_allowed());
            }

            limiter.reset("a");
            assert!(limiter.allow_at("a", now).is_allowed(), "{limiter:?}");
            assert!(limiter.allow_at("a", now).is_allowed(), "{limiter:?}");
            assert!(!limiter.allow_at("b", now).is_allowed(), "{limiter:?}");
        }
    }

    #[test]
    fn test_keys_never_interfere() {
        for limiter in all_limiters(3, Duration::from_secs(60)) {
            let now = Instant::now();
            while limiter.allow_at("a", now).is_allowed() {}
            for _ in 0..3 {
                assert!(limiter.allow_at("b", now).is_allowed(), "{limiter:?}");
            }
        }
    }

    #[test]
    fn test_concurrent_distinct_keys_no_lost_updates() {
        const KEYS: usize = 16;
        const PER_KEY: usize = 40;
        const LIMIT: u32 = 25;

        for limiter in all_limiters(LIMIT, Duration::from_secs(3600)) {
            let allowed = AtomicUsize::new(0);
            let limiter = limiter.as_ref();

            thread::scope(|scope| {
                // Four workers per key so every key sees contention.
                for worker in 0..KEYS * 4 {
                    let allowed = &allowed;
                    scope.spawn(move || {
                        let key = format!("key-{}", worker % KEYS);
                        for _ in 0..PER_KEY / 4 {
                            if limiter.allow(&key).is_allowed() {
                                allowed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            assert_eq!(
                allowed.load(Ordering::Relaxed),
                KEYS * LIMIT as usize,
                "{limiter:?}"
            );
            assert_eq!(limiter.tracked_keys(), KEYS);
        }
    }

    #[test]
    fn test_concurrent_under_limit_all_allowed() {
        const KEYS: usize = 20;
        const PER_KEY: usize = 5;

        for limiter in all_limiters(10, Duration::from_secs(3600)) {
            let allowed = AtomicUsize::new(0);
            let limiter = limiter.as_ref();

            thread::scope(|scope| {
                for k in 0..KEYS {
                    let allowed = &allowed;
                    scope.spawn(move || {
                        let key = format!("10.0.0.{k}");
                        for _ in 0..PER_KEY {
                            if limiter.allow(&key).is_allowed() {
                                allowed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    });
                }
            });

            assert_eq!(allowed.load(Ordering::Relaxed), KEYS * PER_KEY);
        }
    }

    #[test]
    fn test_tracked_keys_follow_reset() {
        for limiter in all_limiters(1, Duration::from_secs(60)) {
            let now = Instant::now();
            for key in ["a", "b", "c", "a"] {
                limiter.allow_at(key, now);
            }
            assert_eq!(limiter.tracked_keys(), 3, "{limiter:?}");

            limiter.reset("b");
            limiter.reset("b");
            limiter.reset("unseen");
            assert_eq!(limiter.tracked_keys(), 2, "{limiter:?}");

            limiter.allow_at("b", now);
            assert_eq!(limiter.tracked_keys(), 3, "{limiter:?}");
        }
    }

    // ==========================================================================
    // Configuration
    // ==========================================================================

    #[test]
    fn test_algorithm_parse_lossy() {
        assert_eq!(Algorithm::parse_lossy("token_bucket"), Algorithm::TokenBucket);
        assert_eq!(
            Algorithm::parse_lossy("Sliding_Window"),
            Algorithm::SlidingWindow
        );
        assert_eq!(Algorithm::parse_lossy("fixed_window"), Algorithm::FixedWindow);
        assert_eq!(Algorithm::parse_lossy("leaky"), Algorithm::TokenBucket);
    }

    #[test]
    fn test_key_extractor_parse_lossy() {
        assert_eq!(KeyExtractor::parse_lossy("ip"), KeyExtractor::Ip);
        assert_eq!(KeyExtractor::parse_lossy(" header "), KeyExtractor::Header);
        assert_eq!(KeyExtractor::parse_lossy("custom"), KeyExtractor::Custom);
        assert_eq!(KeyExtractor::parse_lossy("cookie"), KeyExtractor::Ip);
    }

    #[test]
    fn test_disabled_layer_has_no_limiter() {
        assert!(!RateLimitLayer::new(RateLimitConfig::disabled()).is_enabled());
        assert!(RateLimitLayer::new(RateLimitConfig::new(1, Duration::from_secs(1))).is_enabled());
    }

    // ==========================================================================
    // Middleware
    // ==========================================================================

    #[tokio::test]
    async fn test_disabled_passes_everything_without_headers() {
        let app = app(RateLimitConfig::disabled());

        for _ in 0..50 {
            let response = app
                .clone()
                .oneshot(request_from("127.0.0.1:1000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(X_RATELIMIT_LIMIT).is_none());
            assert!(response.headers().get(X_RATELIMIT_WINDOW).is_none());
        }
    }

    #[tokio::test]
    async fn test_token_bucket_scenario() {
        let app = app(
            RateLimitConfig::new(3, Duration::from_secs(1))
                .with_algorithm(Algorithm::TokenBucket)
                .with_key_extractor(KeyExtractor::Ip),
        );

        for _ in 0..3 {
            let response = app
                .clone()
                .oneshot(request_from("127.0.0.1:1000"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
            assert_eq!(response.headers()[X_RATELIMIT_WINDOW], "1s");
        }

        let response = app
            .clone()
            .oneshot(request_from("127.0.0.1:1000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "3");
        let retry_after = response.headers()[X_RATELIMIT_RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse::<u64>()
            .unwrap();
        assert!(retry_after >= 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("Rate limit exceeded. Try again in "));
    }

    #[tokio::test]
    async fn test_denied_request_never_reaches_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new()
            .route(
                "/test",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        "ok"
                    }
                }),
            )
            .layer(RateLimitLayer::new(RateLimitConfig::new(
                2,
                Duration::from_secs(60),
            )));

        for _ in 0..5 {
            status_of(&app, request_from("10.0.0.1:1")).await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_header_extractor_separate_quotas() {
        let app = app(
            RateLimitConfig::new(2, Duration::from_secs(60))
                .with_key_extractor(KeyExtractor::Header)
                .with_header_name("X-API-Key"),
        );

        let keyed = |key: &str| {
            let mut req = request_from("127.0.0.1:1000");
            req.headers_mut()
                .insert("x-api-key", HeaderValue::from_str(key).unwrap());
            req
        };

        for key in ["key-a", "key-b"] {
            assert_eq!(status_of(&app, keyed(key)).await, StatusCode::OK);
            assert_eq!(status_of(&app, keyed(key)).await, StatusCode::OK);
            assert_eq!(
                status_of(&app, keyed(key)).await,
                StatusCode::TOO_MANY_REQUESTS
            );
        }
    }

    #[tokio::test]
    async fn test_header_extractor_falls_back_to_ip() {
        let app = app(
            RateLimitConfig::new(1, Duration::from_secs(60))
                .with_key_extractor(KeyExtractor::Header),
        );

        assert_eq!(
            status_of(&app, request_from("10.0.0.1:1")).await,
            StatusCode::OK
        );
        assert_eq!(
            status_of(&app, request_from("10.0.0.1:2")).await,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(&app, request_from("10.0.0.2:1")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_custom_extractor() {
        let app = app(
            RateLimitConfig::new(1, Duration::from_secs(60)).with_custom_key_fn(|req| {
                req.headers()
                    .get("user-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );

        let as_user = |user: &str| {
            let mut req = request_from("127.0.0.1:1000");
            req.headers_mut()
                .insert("user-id", HeaderValue::from_str(user).unwrap());
            req
        };

        assert_eq!(status_of(&app, as_user("userA")).await, StatusCode::OK);
        assert_eq!(
            status_of(&app, as_user("userA")).await,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(status_of(&app, as_user("userB")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_every_algorithm_through_middleware() {
        for algorithm in [
            Algorithm::TokenBucket,
            Algorithm::SlidingWindow,
            Algorithm::FixedWindow,
        ] {
            let app = app(RateLimitConfig::new(2, Duration::from_secs(1)).with_algorithm(algorithm));

            assert_eq!(
                status_of(&app, request_from("192.168.0.9:1")).await,
                StatusCode::OK
            );
            assert_eq!(
                status_of(&app, request_from("192.168.0.9:1")).await,
                StatusCode::OK
            );
            assert_eq!(
                status_of(&app, request_from("192.168.0.9:1")).await,
                StatusCode::TOO_MANY_REQUESTS,
                "{algorithm}"
            );
        }
    }

    #[tokio::test]
    async fn test_window_header_formatting() {
        let app = app(RateLimitConfig::new(10, Duration::from_secs(90)));
        let response = app.oneshot(request_from("10.0.0.1:1")).await.unwrap();
        assert_eq!(response.headers()[X_RATELIMIT_WINDOW], "1m30s");
    }
}
