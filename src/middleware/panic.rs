//! Panic recovery.
//!
//! A panicking handler must not tear down the connection task. The panic is
//! logged at `error` together with the request line, peer address, request
//! IDs and (when `RUST_BACKTRACE` allows it) the panic-site backtrace. It is
//! counted and answered with a JSON 500 that carries the IDs so a client
//! report can be matched to the log line:
//!
//! ```json
//! {"error": "Internal server error", "correlation_id": "...", "request_id": "..."}
//! ```
//!
//! The request ID layer must wrap this one for the IDs to be known.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::task::{Context, Poll};

use axum::Json;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use futures::FutureExt;
use serde::Serialize;
use tower::{Layer, Service};
use tracing::error;

use crate::metrics;
use crate::middleware::ip::extract_client_ip;
use crate::middleware::request_id::{RequestContext, RequestIdExt};

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

static BACKTRACE_HOOK: Once = Once::new();

/// Chain a panic hook that stashes the backtrace for the unwinding thread.
/// The unwind is caught on the same thread that panicked, so the recovery
/// code can pick it up there.
fn install_backtrace_hook() {
    BACKTRACE_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(Backtrace::capture()));
            previous(info);
        }));
    });
}

fn take_backtrace() -> Option<Backtrace> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Layer converting handler panics into `500 Internal Server Error`.
#[derive(Debug, Clone, Copy)]
pub struct PanicRecoveryLayer;

impl PanicRecoveryLayer {
    pub fn new() -> Self {
        install_backtrace_hook();
        Self
    }
}

impl Default for PanicRecoveryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for PanicRecoveryLayer {
    type Service = PanicRecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PanicRecoveryService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct PanicRecoveryService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for PanicRecoveryService<S>
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
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let origin = PanicOrigin::from_request(&req);

        // A handler can panic while building its future as well as while
        // it is polled.
        let future = match panic::catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(future) => future,
            Err(payload) => {
                let response = origin.recover(payload.as_ref());
                return Box::pin(async move { Ok(response) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Ok(origin.recover(payload.as_ref())),
            }
        })
    }
}

/// What is known about a request before it reaches the handler.
struct PanicOrigin {
    method: Method,
    uri: Uri,
    remote_addr: String,
    context: Option<RequestContext>,
}

#[derive(Serialize)]
struct PanicBody<'a> {
    error: &'static str,
    #[serde(skip_serializing_if = "str::is_empty")]
    correlation_id: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace_id: Option<&'a str>,
}

impl PanicOrigin {
    fn from_request(req: &Request<Body>) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            remote_addr: extract_client_ip(req).into_owned(),
            context: req.request_context().cloned(),
        }
    }

    fn recover(&self, payload: &(dyn Any + Send)) -> Response<Body> {
        let message = panic_message(payload);
        let backtrace = take_backtrace()
            .map(|bt| bt.to_string())
            .unwrap_or_default();
        let ctx = self.context.as_ref();

        error!(
            panic = %message,
            method = %self.method,
            uri = %self.uri,
            remote_addr = %self.remote_addr,
            correlation_id = ctx.map_or("", |c| c.correlation_id.as_str()),
            request_id = ctx.map_or("", |c| c.request_id.as_str()),
            trace_id = ctx.and_then(|c| c.trace_id.as_deref()).unwrap_or(""),
            backtrace = %backtrace,
            "Request panicked - internal server error"
        );
        metrics::record_panic_recovered();

        let body = PanicBody {
            error: "Internal server error",
            correlation_id: ctx.map_or("", |c| c.correlation_id.as_str()),
            request_id: ctx.map_or("", |c| c.request_id.as_str()),
            trace_id: ctx.and_then(|c| c.trace_id.as_deref()),
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

fn panic_message(err: &(dyn Any + Send)) -> &str {
    if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic payload"
    }
}
