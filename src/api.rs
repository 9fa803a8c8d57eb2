//! Pluggable route groups mounted by the [`Server`](crate::server::Server).

use std::future::Future;
use std::pin::Pin;

use axum::Router;

/// Boxed future returned by lifecycle hooks.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A group of routes with optional lifecycle hooks.
///
/// `start` runs once before the listener accepts connections; a failure
/// aborts startup. `stop` runs after the listener has drained, bounded by
/// the shutdown timeout; failures are logged and do not stop other APIs.
///
/// # Example
///
/// ```rust,ignore
/// struct Hello;
///
/// impl Api for Hello {
///     fn name(&self) -> &str {
///         "hello"
///     }
///
///     fn router(&self) -> Router {
///         Router::new().route("/hello", get(|| async { "hello" }))
///     }
/// }
/// ```
pub trait Api: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Routes contributed by this API.
    fn router(&self) -> Router;

    fn start(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn stop(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}
