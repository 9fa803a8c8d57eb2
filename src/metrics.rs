//! Prometheus metrics for application observability.
//!
//! Metrics are recorded through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs the Prometheus exporter, so middleware can
//! record unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `http_rate_limit_allowed_total` - Requests admitted by the rate limiter (label: algorithm)
//! - `http_rate_limit_denied_total` - Requests rejected with 429 (label: algorithm)
//! - `http_panics_recovered_total` - Handler panics converted into 500 responses
//!
//! ## Gauges
//! - `http_rate_limit_tracked_keys` - Keys currently holding limiter state (label: algorithm)
//!
//! # Usage
//!
//! ```rust,ignore
//! use obvious_server::metrics::init_metrics;
//!
//! // Initialize metrics (call once at startup)
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! ```

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_ALLOWED_TOTAL: &str = "http_rate_limit_allowed_total";
    pub const RATE_LIMIT_DENIED_TOTAL: &str = "http_rate_limit_denied_total";
    pub const RATE_LIMIT_TRACKED_KEYS: &str = "http_rate_limit_tracked_keys";
    pub const PANICS_RECOVERED_TOTAL: &str = "http_panics_recovered_total";
}

/// Initialize the Prometheus metrics exporter.
///
/// Starts the Prometheus HTTP listener on `metrics_addr` and registers
/// metric descriptions.
///
/// # Errors
///
/// Returns `AppError::Internal` if the exporter can not be installed (for
/// example, when a recorder is already set or the address is in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> AppResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| AppError::Internal(format!("Failed to install Prometheus exporter: {e}")))?;

    describe_counter!(
        names::RATE_LIMIT_ALLOWED_TOTAL,
        "Total number of requests admitted by the rate limiter"
    );
    describe_counter!(
        names::RATE_LIMIT_DENIED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::PANICS_RECOVERED_TOTAL,
        "Total number of handler panics recovered into 500 responses"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_KEYS,
        "Number of keys currently tracked by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Record one rate limiter decision.
pub fn record_rate_limit_decision(algorithm: &'static str, allowed: bool) {
    let name = if allowed {
        names::RATE_LIMIT_ALLOWED_TOTAL
    } else {
        names::RATE_LIMIT_DENIED_TOTAL
    };
    counter!(name, "algorithm" => algorithm).increment(1);
}

/// Publish the number of keys a limiter is tracking.
pub fn record_tracked_keys(algorithm: &'static str, keys: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_KEYS, "algorithm" => algorithm).set(keys as f64);
}

/// Record a recovered handler panic.
pub fn record_panic_recovered() {
    counter!(names::PANICS_RECOVERED_TOTAL).increment(1);
}
