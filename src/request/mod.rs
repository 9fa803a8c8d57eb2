//! Helpers for handlers: response envelopes, pagination and body decoding.
//!
//! # Envelopes
//!
//! ```json
//! {"status": {"success": true}, "data": {...}}
//! {"status": {"success": true}, "cursor": {"prev": null, "next": "b"}, "count": 2, "data": [...]}
//! {"success": false, "error": "resource not found"}
//! ```
//!
//! # Pagination
//!
//! [`PaginationOptions`] reads `cursor`, `limit`, `sort` and `sortField` from
//! the query string. [`link_header`] builds an RFC 5988 `Link` header with
//! `prev`/`next` relations for a [`Cursor`].
//!
//! # Bodies
//!
//! [`JsonBody`] decodes up to [`MAX_BODY_SIZE`] bytes of JSON and rejects
//! malformed input with `400 Bad Request` and a message naming the problem.

mod body;
mod error;
mod pagination;
mod response;

pub use body::{JsonBody, MAX_BODY_SIZE, decode_json};
pub use error::{ResponseError, get_response_error, has_code, reply_err};
pub use pagination::{
    Cursor, DEFAULT_LIMIT, PaginationOptions, add_link_header, link_header,
};
pub use response::{ListResponse, Reply, ResultStatus, SingleResponse};
