use std::process::ExitCode;
use std::sync::Arc;

use axum::Router;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use obvious_server::middleware::{ApiCaller, RequestIdExt};
use obvious_server::request::{
    Cursor, JsonBody, ListResponse, PaginationOptions, Reply, SingleResponse, add_link_header,
    link_header,
};
use obvious_server::{Api, AppError, AppResult, Config, Server, ServerVersion, metrics};

const NAMES: [&str; 6] = ["ada", "barbara", "edsger", "grace", "ken", "linus"];

/// Sample API greeting the caller.
struct Hello {
    public_url: String,
}

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

impl Api for Hello {
    fn name(&self) -> &str {
        "hello"
    }

    fn router(&self) -> Router {
        let public_url = self.public_url.clone();

        Router::new()
            .route(
                "/hello",
                get(greet).post(|JsonBody(greeting): JsonBody<Greeting>| async move {
                    Reply::new(
                        StatusCode::CREATED,
                        SingleResponse::new(format!("hello {}", greeting.name)),
                    )
                }),
            )
            .route(
                "/hello/names",
                get(move |opts: PaginationOptions, uri: Uri| async move {
                    list_names(&public_url, &opts, &uri)
                }),
            )
    }
}

async fn greet(caller: ApiCaller, req: axum::extract::Request) -> String {
    let correlation = req
        .request_context()
        .map(|ctx| ctx.correlation_id.clone())
        .unwrap_or_default();
    format!(
        "hello {} (correlation {correlation})\n",
        if caller.user_agent.is_empty() {
            "stranger"
        } else {
            caller.user_agent.as_str()
        }
    )
}

/// Page through [`NAMES`]; the cursor is the index of the first entry.
fn list_names(public_url: &str, opts: &PaginationOptions, uri: &Uri) -> AppResult<Response> {
    let start = if opts.cursor.is_empty() {
        0
    } else {
        opts.cursor
            .parse::<usize>()
            .map_err(|_| AppError::BadRequest(format!("invalid cursor {:?}", opts.cursor)))?
    };

    let mut names: Vec<&str> = NAMES.to_vec();
    if opts.descending {
        names.reverse();
    }
    let page: Vec<&str> = names.iter().skip(start).take(opts.limit).copied().collect();
    let end = start + page.len();

    let cursor = Cursor {
        prev: (start > 0).then(|| start.saturating_sub(opts.limit).to_string()),
        next: (end < names.len()).then(|| end.to_string()),
    };
    let link = link_header(public_url, uri.path(), uri, &cursor)?;

    let mut response = Reply::ok(ListResponse::new(page, cursor)).into_response();
    if let Some(link) = link {
        add_link_header(response.headers_mut(), link);
    }
    Ok(response)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging; the filter is replaced once configuration is loaded
    let (filter, filter_handle) = reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();

    info!("Starting obvious_server v{}", env!("CARGO_PKG_VERSION"));

    match run(filter_handle).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the application, returning an exit code on error.
async fn run(log_filter: reload::Handle<EnvFilter, Registry>) -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;

    let filter = config.log_filter().map_err(|e| {
        error!("{e}");
        exitcode::CONFIG
    })?;
    log_filter.reload(filter).map_err(|e| {
        error!("Failed to apply log level: {e}");
        exitcode::SOFTWARE
    })?;

    info!(
        host = %config.host,
        port = %config.port,
        mode = %config.mode,
        public_url = %config.public_url(),
        log_level = %config.log_level,
        rate_limit = config.rate_limit_enabled,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::init_metrics(addr).map_err(|e| {
            error!("Failed to start metrics exporter: {e}");
            exitcode::UNAVAILABLE
        })?;
    }

    let version = ServerVersion::new(
        option_env!("BUILD_REVISION").unwrap_or("latest"),
        option_env!("BUILD_TAG").unwrap_or(env!("CARGO_PKG_VERSION")),
        option_env!("BUILD_TIME").unwrap_or("latest"),
    );

    let hello = Hello {
        public_url: config.public_url(),
    };

    Server::new(config)
        .with_version(version)
        .with_apis([Arc::new(hello) as Arc<dyn Api>])
        .run()
        .await
        .map_err(|e| {
            error!("Server error: {e}");
            match e {
                AppError::Server(_) => exitcode::UNAVAILABLE,
                AppError::ConfigError(_) => exitcode::CONFIG,
                _ => exitcode::SOFTWARE,
            }
        })
}
