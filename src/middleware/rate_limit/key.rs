use axum::body::Body;
use axum::http::Request;

use super::{KeyExtractor, RateLimitConfig};
use crate::middleware::ip::extract_client_ip;

/// Derive the rate limit partition key for a request.
///
/// - [`KeyExtractor::Ip`]: client IP (see [`extract_client_ip`])
/// - [`KeyExtractor::Header`]: value of `config.header_name`; an absent,
///   empty or non-UTF-8 value falls back to the client IP
/// - [`KeyExtractor::Custom`]: `config.custom_key_fn`; falls back to the
///   client IP when no function is configured
pub fn extract_key(req: &Request<Body>, config: &RateLimitConfig) -> String {
    match config.key_extractor {
        KeyExtractor::Ip => extract_client_ip(req).into_owned(),
        KeyExtractor::Header => req
            .headers()
            .get(config.header_name.as_str())
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map_or_else(|| extract_client_ip(req).into_owned(), str::to_owned),
        KeyExtractor::Custom => match &config.custom_key_fn {
            Some(key_fn) => key_fn(req),
            None => extract_client_ip(req).into_owned(),
        },
    }
}
