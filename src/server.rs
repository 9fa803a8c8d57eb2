//! Server builder and lifecycle.
//!
//! # Lifecycle
//!
//! 1. `load()` every registered [`Configurable`] (a failure aborts startup)
//! 2. Prepare the listener: plain HTTP, or TLS in `https` mode
//! 3. `start()` every registered [`Api`] (a failure aborts startup)
//! 4. Serve with peer addresses available to the rate limiter
//! 5. On Ctrl+C, SIGTERM or the caller's shutdown future, stop accepting
//!    and drain in-flight requests
//! 6. `stop()` every API
//!
//! Steps 5 and 6 share one deadline of `shutdown_timeout`. When it passes,
//! every connection still open is failed at its next read or write, and the
//! connection tasks end.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::Api;
use crate::config::{Config, Configurable};
use crate::error::{AppError, AppResult};
use crate::handlers::{HealthRegistry, ServerVersion};
use crate::listener::{ListenerOptions, ServerListener};
use crate::routes::{Middleware, build_router};
use crate::state::AppState;
use crate::utils::{self, format_duration};

/// How long connection tasks get to unwind after being force-closed.
const FORCED_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// HTTP server with the built-in middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// Server::new(config)
///     .with_version(ServerVersion::new("abc123", "v1.2.0", "2026-01-01T00:00:00Z"))
///     .with_apis([Arc::new(Hello) as Arc<dyn Api>])
///     .run()
///     .await?;
/// ```
pub struct Server {
    config: Config,
    version: ServerVersion,
    address: Option<String>,
    configs: Vec<Box<dyn Configurable>>,
    apis: Vec<Arc<dyn Api>>,
    health: HealthRegistry,
    middleware: Vec<Middleware>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            version: ServerVersion::default(),
            address: None,
            configs: Vec::new(),
            apis: Vec::new(),
            health: HealthRegistry::new(),
            middleware: Vec::new(),
        }
    }

    /// Build information served at `/version`.
    pub fn with_version(mut self, version: ServerVersion) -> Self {
        self.version = version;
        self
    }

    /// Override the `host:port` derived from configuration.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Register a configuration section, loaded before any API starts.
    pub fn with_config<C>(mut self, config: C) -> Self
    where
        C: Configurable + 'static,
    {
        self.configs.push(Box::new(config));
        self
    }

    pub fn with_apis<I>(mut self, apis: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Api>>,
    {
        self.apis.extend(apis);
        self
    }

    pub fn with_health_check<F>(self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.health.register(name, check);
        self
    }

    /// Add middleware that wraps the API routes inside the built-in stack.
    /// The first middleware added is the outermost.
    pub fn with_middleware<F>(mut self, middleware: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Shared registry behind `/healthz`; checks may be added at any time.
    pub fn health(&self) -> HealthRegistry {
        self.health.clone()
    }

    /// Address the server binds to.
    pub fn address(&self) -> String {
        self.address
            .clone()
            .unwrap_or_else(|| self.config.server_addr())
    }

    /// The fully layered router, without a listener.
    pub fn router(&self) -> Router {
        let state = AppState::new(
            self.config.clone(),
            self.version.clone(),
            self.health.clone(),
        );
        build_router(state, &self.apis, &self.middleware)
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a registered configuration or the
    /// TLS material fails to load, `AppError::Server` if binding or serving
    /// fails and `AppError::ApiLifecycle` if an API fails to start.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Like [`run`](Self::run), but also shuts down when `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let address = self.address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            error!(addr = %address, "Failed to bind: {e}");
            AppError::Server(e)
        })?;

        self.serve(listener, async {
            tokio::select! {
                () = utils::shutdown_signal() => {}
                () = shutdown => {
                    info!("Shutdown requested");
                }
            }
        })
        .await
    }

    /// Serve on an already bound listener until `shutdown` completes.
    pub async fn serve<F>(mut self, listener: TcpListener, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        load_configs(&mut self.configs)?;
        let options = ListenerOptions::from_config(&self.config)?;
        start_apis(&self.apis).await?;

        let router = self.router();
        let close = CancellationToken::new();
        let listener = ServerListener::new(listener, options, close.clone())?;
        let addr = axum::serve::Listener::local_addr(&listener)?;

        let stop = CancellationToken::new();
        let signal = stop.clone();
        let mut serving = tokio::spawn(
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .into_future(),
        );

        info!(addr = %addr, mode = %self.config.mode, "Starting HTTP server");

        let early_exit = tokio::select! {
            joined = &mut serving => Some(joined),
            () = shutdown => None,
        };

        let grace = self.config.shutdown_timeout;
        let deadline = Instant::now() + grace;

        let served = match early_exit {
            Some(joined) => joined,
            None => {
                info!(
                    timeout = %format_duration(grace),
                    "Shutdown signal received, starting graceful shutdown"
                );
                stop.cancel();
                match timeout_at(deadline, &mut serving).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("Graceful shutdown timed out, closing open connections");
                        close.cancel();
                        match timeout(FORCED_CLOSE_GRACE, &mut serving).await {
                            Ok(joined) => joined,
                            Err(_) => {
                                serving.abort();
                                Ok(Ok(()))
                            }
                        }
                    }
                }
            }
        };

        stop_apis(&self.apis, deadline).await;
        info!("Server shutdown complete");

        match served {
            Ok(result) => result.map_err(AppError::Server),
            Err(e) => Err(AppError::Internal(format!("server task failed: {e}"))),
        }
    }
}

fn load_configs(configs: &mut [Box<dyn Configurable>]) -> AppResult<()> {
    for config in configs.iter_mut() {
        debug!(config = config.name(), "Loading configuration");
        config.load().map_err(|e| {
            error!(config = config.name(), "Failed to load configuration: {e}");
            match e {
                AppError::ConfigError(msg) => {
                    AppError::ConfigError(format!("{}: {msg}", config.name()))
                }
                other => AppError::ConfigError(format!("{}: {other}", config.name())),
            }
        })?;
    }
    Ok(())
}

async fn start_apis(apis: &[Arc<dyn Api>]) -> AppResult<()> {
    for api in apis {
        debug!(api = api.name(), "Starting API");
        api.start().await.map_err(|e| {
            AppError::ApiLifecycle(format!("failed to start API {}: {e:#}", api.name()))
        })?;
    }
    Ok(())
}

async fn stop_apis(apis: &[Arc<dyn Api>], deadline: Instant) {
    for api in apis {
        debug!(api = api.name(), "Stopping API");
        match timeout_at(deadline, api.stop()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(api = api.name(), "Error stopping API: {e:#}"),
            Err(_) => warn!(api = api.name(), "Shutdown deadline passed while stopping API"),
        }
    }
}
