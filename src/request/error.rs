use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use super::response::ResultStatus;
use crate::middleware::RequestContext;

/// Handler error carrying its HTTP status and a user-facing status text.
///
/// Renders as `{"status": "...", "code": 42, "error": "..."}`; `code` and
/// `error` are omitted when unset. When built with a [`RequestContext`]
/// the correlation IDs are included and logged.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    #[serde(skip)]
    pub status_code: StatusCode,
    #[serde(rename = "status")]
    pub status_text: String,
    /// Application-specific error code.
    #[serde(rename = "code", skip_serializing_if = "Option::is_none")]
    pub app_code: Option<i64>,
    #[serde(rename = "error", skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
    #[serde(flatten)]
    pub context: Option<RequestContext>,
    #[serde(skip)]
    source: Option<anyhow::Error>,
}

impl ResponseError {
    pub fn new(status_code: StatusCode, status_text: impl Into<String>) -> Self {
        Self {
            status_code,
            status_text: status_text.into(),
            app_code: None,
            error_text: None,
            context: None,
            source: None,
        }
    }

    /// `400 invalid request`, exposing `err` as the error text.
    pub fn invalid_request(err: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid request").with_source(err)
    }

    /// `500 unable to process response`, exposing `err` as the error text.
    pub fn render(err: impl Into<anyhow::Error>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "unable to process response").with_source(err)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn server() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "error processing request")
    }

    /// Attach the underlying error; its message becomes the error text.
    pub fn with_source(mut self, err: impl Into<anyhow::Error>) -> Self {
        let err = err.into();
        self.error_text = Some(err.to_string());
        self.source = Some(err);
        self
    }

    pub fn with_app_code(mut self, code: i64) -> Self {
        self.app_code = Some(code);
        self
    }

    pub fn with_context(mut self, context: &RequestContext) -> Self {
        self.context = Some(context.clone());
        self
    }

    pub fn http_code(&self) -> StatusCode {
        self.status_code
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source}"),
            None => write!(f, "{}", self.status_text),
        }
    }
}

impl std::error::Error for ResponseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| -> &(dyn std::error::Error + 'static) { e.as_ref() })
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        let ctx = self.context.as_ref();
        let correlation_id = ctx.map_or("", |c| c.correlation_id.as_str());
        let request_id = ctx.map_or("", |c| c.request_id.as_str());

        if self.status_code.is_server_error() {
            error!(
                status = self.status_code.as_u16(),
                status_text = %self.status_text,
                app_code = ?self.app_code,
                correlation_id,
                request_id,
                error = %self,
                "Request failed"
            );
        } else {
            warn!(
                status = self.status_code.as_u16(),
                status_text = %self.status_text,
                app_code = ?self.app_code,
                correlation_id,
                request_id,
                error = %self,
                "Request rejected"
            );
        }

        (self.status_code, Json(&self)).into_response()
    }
}

/// Whether `err` is a [`ResponseError`] with status `code`.
pub fn has_code(err: &anyhow::Error, code: StatusCode) -> bool {
    get_response_error(err).is_some_and(|re| re.status_code == code)
}

pub fn get_response_error(err: &anyhow::Error) -> Option<&ResponseError> {
    err.downcast_ref::<ResponseError>()
}

/// Answer with `{"success": false, "error": ...}`.
///
/// The status comes from a wrapped [`ResponseError`]; any other error is a
/// 500.
pub fn reply_err(err: &anyhow::Error) -> Response {
    let status = get_response_error(err).map_or(StatusCode::INTERNAL_SERVER_ERROR, |re| {
        re.status_code
    });
    (status, Json(ResultStatus::failed(err.to_string()))).into_response()
}
