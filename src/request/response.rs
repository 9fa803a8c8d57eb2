use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::pagination::Cursor;

/// Outcome block shared by all envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultStatus {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// `{"status": ..., "data": ...}` around a single value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleResponse<T> {
    pub status: ResultStatus,
    pub data: T,
}

impl<T> SingleResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: ResultStatus::ok(),
            data,
        }
    }
}

/// One page of a listing, with the cursors for its neighbours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub status: ResultStatus,
    pub cursor: Cursor,
    pub count: usize,
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>, cursor: Cursor) -> Self {
        Self {
            status: ResultStatus::ok(),
            cursor,
            count: data.len(),
            data,
        }
    }
}

/// JSON reply with an explicit status code.
///
/// `204 No Content` is sent without a body whatever the payload.
///
/// ```rust,ignore
/// async fn create(JsonBody(item): JsonBody<Item>) -> Reply<SingleResponse<Item>> {
///     Reply::new(StatusCode::CREATED, SingleResponse::new(item))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: T,
}

impl<T> Reply<T> {
    pub fn new(status: StatusCode, body: T) -> Self {
        Self { status, body }
    }

    pub fn ok(body: T) -> Self {
        Self::new(StatusCode::OK, body)
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        if self.status == StatusCode::NO_CONTENT {
            return self.status.into_response();
        }
        (self.status, Json(self.body)).into_response()
    }
}
