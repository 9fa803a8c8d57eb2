//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from `SERVER_*` environment variables with
//! sensible defaults for development. In production, configure via
//! environment variables or a `.env` file. Loading is fail-fast: a value
//! that does not parse, or a combination that does not validate, aborts
//! startup with `AppError::ConfigError`.
//!
//! # Durations
//!
//! Duration variables use compact unit notation: `500ms`, `30s`, `1m30s`, `2h`.
//!
//! # Listener
//!
//! - `SERVER_MODE`: `http` (default) or `https`
//! - `SERVER_READ_TIMEOUT`: TLS handshake and request body deadline (default: 30s)
//! - `SERVER_WRITE_TIMEOUT`: Deadline for producing a response (default: 30s)
//! - `SERVER_IDLE_TIMEOUT`: Close connections with no traffic for this long (default: 2m)
//! - `SERVER_TLS_MIN_VERSION`: `1.2` (default) or `1.3`
//! - `SERVER_CERTIFICATE_CERT_FILE` / `SERVER_CERTIFICATE_KEY_FILE`: PEM
//!   certificate chain and private key, required in `https` mode
//! - `SERVER_CERTIFICATE_CA_FILE`: PEM client CA bundle; when set, clients
//!   must present a certificate signed by it
//!
//! A timeout of `0s` disables that timeout.
//!
//! # Rate Limiting
//!
//! - `SERVER_RATE_LIMIT_ENABLED`: Turn the limiter on (default: false)
//! - `SERVER_RATE_LIMIT_REQUESTS`: Requests per window (default: 100)
//! - `SERVER_RATE_LIMIT_WINDOW`: Window length (default: 1m)
//! - `SERVER_RATE_LIMIT_BURST`: Token bucket capacity, 0 = requests (default: 0)
//! - `SERVER_RATE_LIMIT_ALGORITHM`: `token_bucket` | `sliding_window` | `fixed_window`
//! - `SERVER_RATE_LIMIT_KEY_EXTRACTOR`: `ip` | `header` | `custom`
//! - `SERVER_RATE_LIMIT_HEADER`: Header used by the `header` extractor (default: X-API-Key)
//!
//! Unknown algorithm or extractor names are not rejected; they fall back to
//! `token_bucket` and `ip` with a warning.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::{
    Algorithm, DEFAULT_KEY_HEADER, KeyExtractor, RateLimitConfig,
};
use crate::utils::parse_duration;

const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:8080";

/// How the server listener speaks to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    #[default]
    Http,
    Https,
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerMode::Http => "http",
            ServerMode::Https => "https",
        }
    }
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(ServerMode::Http),
            "https" => Ok(ServerMode::Https),
            other => Err(format!(
                "unsupported server mode {other:?}, expected 'http' or 'https'"
            )),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowest TLS protocol version accepted in `https` mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.2" => Ok(TlsVersion::Tls12),
            "1.3" => Ok(TlsVersion::Tls13),
            _ => Err("TLS_MIN_VERSION must be either '1.2' or '1.3'".to_string()),
        }
    }
}

/// A registered configuration section loaded before the server starts.
///
/// Every registered section is loaded once, in registration order, before
/// any [`Api`](crate::Api) is started. A failure aborts startup.
///
/// # Example
///
/// ```rust,ignore
/// struct Database {
///     url: Arc<OnceLock<String>>,
/// }
///
/// impl Configurable for Database {
///     fn load(&mut self) -> AppResult<()> {
///         let url = std::env::var("DATABASE_URL")
///             .map_err(|_| AppError::ConfigError("DATABASE_URL is not set".into()))?;
///         let _ = self.url.set(url);
///         Ok(())
///     }
/// }
/// ```
pub trait Configurable: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn load(&mut self) -> AppResult<()>;
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Public domain name of the service (default: "example.com")
    pub domain: String,

    /// How long graceful shutdown may take before remaining connections
    /// are forcibly closed (default: 30s)
    pub shutdown_timeout: Duration,

    // =========================================================================
    // Listener Configuration
    // =========================================================================
    pub mode: ServerMode,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub idle_timeout: Duration,
    pub tls_min_version: TlsVersion,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub tls_ca_file: Option<PathBuf>,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Allowed CORS origins. Each must carry an `http://` or `https://`
    /// scheme; the `*` wildcard is rejected.
    pub cors_allowed_origins: Vec<String>,

    /// Emit security headers on every response (default: true)
    pub security_headers: bool,

    /// `Strict-Transport-Security` max-age in seconds (default: one year)
    pub hsts_max_age: u64,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_burst: u32,
    pub rate_limit_algorithm: Algorithm,
    pub rate_limit_key_extractor: KeyExtractor,
    pub rate_limit_header: String,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any configuration is invalid
    /// (e.g., non-numeric port, wildcard CORS origin, zero rate limit window).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// `lookup` returns the raw value of a variable, or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        let defaults = Self::default();

        let config = Self {
            // Server
            host: vars.string("SERVER_HOST", defaults.host),
            port: vars.parse("SERVER_PORT", defaults.port)?,
            domain: vars.string("SERVER_DOMAIN", defaults.domain),
            shutdown_timeout: vars.duration("SERVER_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout)?,

            // Listener
            mode: vars.parse("SERVER_MODE", defaults.mode)?,
            read_timeout: vars.duration("SERVER_READ_TIMEOUT", defaults.read_timeout)?,
            write_timeout: vars.duration("SERVER_WRITE_TIMEOUT", defaults.write_timeout)?,
            idle_timeout: vars.duration("SERVER_IDLE_TIMEOUT", defaults.idle_timeout)?,
            tls_min_version: vars.parse("SERVER_TLS_MIN_VERSION", defaults.tls_min_version)?,
            tls_cert_file: vars.path("SERVER_CERTIFICATE_CERT_FILE"),
            tls_key_file: vars.path("SERVER_CERTIFICATE_KEY_FILE"),
            tls_ca_file: vars.path("SERVER_CERTIFICATE_CA_FILE"),

            // Security
            cors_allowed_origins: parse_list(
                &vars
                    .get("SERVER_CORS_ALLOWED_ORIGINS")
                    .unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
            ),
            security_headers: vars.bool(
                "SERVER_SECURITY_HEADERS_ENABLED",
                defaults.security_headers,
            )?,
            hsts_max_age: vars.parse("SERVER_HSTS_MAX_AGE", defaults.hsts_max_age)?,

            // Rate limiting
            rate_limit_enabled: vars.bool("SERVER_RATE_LIMIT_ENABLED", defaults.rate_limit_enabled)?,
            rate_limit_requests: vars.parse(
                "SERVER_RATE_LIMIT_REQUESTS",
                defaults.rate_limit_requests,
            )?,
            rate_limit_window: vars.duration(
                "SERVER_RATE_LIMIT_WINDOW",
                defaults.rate_limit_window,
            )?,
            rate_limit_burst: vars.parse("SERVER_RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_algorithm: vars
                .get("SERVER_RATE_LIMIT_ALGORITHM")
                .map_or(defaults.rate_limit_algorithm, |v| Algorithm::parse_lossy(&v)),
            rate_limit_key_extractor: vars
                .get("SERVER_RATE_LIMIT_KEY_EXTRACTOR")
                .map_or(defaults.rate_limit_key_extractor, |v| {
                    KeyExtractor::parse_lossy(&v)
                }),
            rate_limit_header: vars.string("SERVER_RATE_LIMIT_HEADER", defaults.rate_limit_header),

            // Observability
            log_level: vars.string("RUST_LOG", defaults.log_level),
            metrics_port: vars.parse("SERVER_METRICS_PORT", defaults.metrics_port)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        for origin in &self.cors_allowed_origins {
            if origin == "*" {
                return Err(AppError::ConfigError(
                    "wildcard '*' is not allowed in SERVER_CORS_ALLOWED_ORIGINS; use specific domains instead"
                        .to_string(),
                ));
            }
            if !origin.starts_with("http://") && !origin.starts_with("https://") {
                return Err(AppError::ConfigError(format!(
                    "CORS origin {origin:?} must include protocol (http:// or https://)"
                )));
            }
        }

        if self.shutdown_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "SERVER_SHUTDOWN_TIMEOUT must be greater than 0".to_string(),
            ));
        }

        self.log_filter()?;

        if self.mode == ServerMode::Https {
            let cert = self.tls_cert_file.as_ref().ok_or_else(|| {
                AppError::ConfigError(
                    "SERVER_CERTIFICATE_CERT_FILE is required when SERVER_MODE=https".to_string(),
                )
            })?;
            let key = self.tls_key_file.as_ref().ok_or_else(|| {
                AppError::ConfigError(
                    "SERVER_CERTIFICATE_KEY_FILE is required when SERVER_MODE=https".to_string(),
                )
            })?;
            if !cert.is_file() {
                return Err(AppError::ConfigError(format!(
                    "TLS certificate file does not exist: {}",
                    cert.display()
                )));
            }
            if !key.is_file() {
                return Err(AppError::ConfigError(format!(
                    "TLS key file does not exist: {}",
                    key.display()
                )));
            }
            if let Some(ca) = &self.tls_ca_file
                && !ca.is_file()
            {
                return Err(AppError::ConfigError(format!(
                    "TLS CA file does not exist: {}",
                    ca.display()
                )));
            }
        }

        if self.rate_limit_enabled {
            if self.rate_limit_requests == 0 {
                return Err(AppError::ConfigError(
                    "SERVER_RATE_LIMIT_REQUESTS must be greater than 0 when rate limiting is enabled"
                        .to_string(),
                ));
            }
            if self.rate_limit_window.is_zero() {
                return Err(AppError::ConfigError(
                    "SERVER_RATE_LIMIT_WINDOW must be greater than 0 when rate limiting is enabled"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Log filter for `log_level`, in `RUST_LOG` directive syntax.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a directive does not parse.
    pub fn log_filter(&self) -> AppResult<EnvFilter> {
        EnvFilter::try_new(&self.log_level)
            .map_err(|e| AppError::ConfigError(format!("Invalid RUST_LOG {:?}: {e}", self.log_level)))
    }

    /// Externally visible base URL, e.g. `https://example.com`, used when
    /// building absolute links such as pagination `Link` headers.
    pub fn public_url(&self) -> String {
        format!("{}://{}", self.mode, self.domain)
    }

    /// Rate limiter settings derived from this configuration.
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            enabled: self.rate_limit_enabled,
            requests: self.rate_limit_requests,
            window: self.rate_limit_window,
            burst: self.rate_limit_burst,
            algorithm: self.rate_limit_algorithm,
            key_extractor: self.rate_limit_key_extractor,
            header_name: self.rate_limit_header.clone(),
            custom_key_fn: None,
        }
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_enabled()
            .then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            domain: "example.com".to_string(),
            shutdown_timeout: Duration::from_secs(30),
            // Listener
            mode: ServerMode::Http,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(120),
            tls_min_version: TlsVersion::Tls12,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
            // Security
            cors_allowed_origins: parse_list(DEFAULT_CORS_ORIGINS),
            security_headers: true,
            hsts_max_age: 31_536_000,
            // Rate limiting
            rate_limit_enabled: false,
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_burst: 0,
            rate_limit_algorithm: Algorithm::TokenBucket,
            rate_limit_key_extractor: KeyExtractor::Ip,
            rate_limit_header: DEFAULT_KEY_HEADER.to_string(),
            // Observability
            log_level: "info".to_string(),
            metrics_port: 0,
        }
    }
}

/// Typed access to a variable source.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn string(&self, name: &str, default: String) -> String {
        self.get(name).unwrap_or(default)
    }

    /// Parse a variable into the specified type with a default value.
    fn parse<T>(&self, name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            Some(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            None => Ok(default),
        }
    }

    /// Unset and empty values both mean "no path".
    fn path(&self, name: &str) -> Option<PathBuf> {
        self.get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    fn duration(&self, name: &str, default: Duration) -> AppResult<Duration> {
        match self.get(name) {
            Some(val) => parse_duration(&val)
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            None => Ok(default),
        }
    }

    /// Booleans accept `1/t/true` and `0/f/false` in any case.
    fn bool(&self, name: &str, default: bool) -> AppResult<bool> {
        let Some(val) = self.get(name) else {
            return Ok(default);
        };
        match val.trim().to_ascii_lowercase().as_str() {
            "1" | "t" | "true" => Ok(true),
            "0" | "f" | "false" => Ok(false),
            _ => Err(AppError::ConfigError(format!(
                "Invalid {name}: expected a boolean, got {val:?}"
            ))),
        }
    }
}

/// Split a comma-separated list, trimming entries and dropping empties.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
