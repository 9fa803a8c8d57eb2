//! # obvious_server
//!
//! Opinionated scaffolding for HTTP services on Axum, featuring:
//!
//! - **Rate Limiting**: Keyed token bucket, sliding window or fixed window,
//!   partitioned by client IP, a header, or a custom function
//! - **Security**: Security headers, strict CORS, panic recovery
//! - **Observability**: Request/correlation IDs, structured logging,
//!   Prometheus metrics, `/healthz` and `/version`
//! - **Lifecycle**: Fail-fast env configuration, registered configuration
//!   sections, API start/stop hooks, bounded graceful shutdown
//! - **Listener**: Plain HTTP or TLS (rustls) with optional client
//!   certificates, read/write/idle timeouts
//! - **Handler helpers**: JSON envelopes, cursor pagination with `Link`
//!   headers, JSON body decoding with precise 400s
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Request ID → Panic → Rate Limit → Security → CORS → Trace  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Built-in handlers (/healthz, /version) + mounted APIs      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use axum::Router;
//! use axum::routing::get;
//! use obvious_server::{Api, Config, Server};
//!
//! struct Hello;
//!
//! impl Api for Hello {
//!     fn name(&self) -> &str {
//!         "hello"
//!     }
//!
//!     fn router(&self) -> Router {
//!         Router::new().route("/hello", get(|| async { "hello" }))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     Server::new(config)
//!         .with_apis([Arc::new(Hello) as Arc<dyn Api>])
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```bash
//! SERVER_RATE_LIMIT_ENABLED=true SERVER_RATE_LIMIT_REQUESTS=100 \
//!   SERVER_RATE_LIMIT_WINDOW=1m SERVER_RATE_LIMIT_ALGORITHM=sliding_window cargo run
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listener;
pub mod metrics;
pub mod middleware;
pub mod request;
pub mod routes;
pub mod server;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use api::Api;
pub use config::{Config, Configurable, ServerMode};
pub use error::{AppError, AppResult};
pub use handlers::{HealthRegistry, ServerVersion};
pub use routes::build_router;
pub use server::Server;
pub use state::AppState;
