use std::collections::HashMap;
use std::convert::Infallible;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Uri, header};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Page size used when `limit` is absent or not a positive integer.
pub const DEFAULT_LIMIT: usize = 1000;

const PARAM_CURSOR: &str = "cursor";
const PARAM_LIMIT: &str = "limit";
const PARAM_SORT: &str = "sort";
const PARAM_SORT_FIELD: &str = "sortField";

/// Listing options from the query string.
///
/// Never rejects a request: malformed values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationOptions {
    pub limit: usize,
    /// Opaque position to resume from; empty for the first page.
    pub cursor: String,
    /// `sort=desc` (any case); everything else is ascending.
    pub descending: bool,
    pub sort_field: Option<String>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            cursor: String::new(),
            descending: false,
            sort_field: None,
        }
    }
}

impl PaginationOptions {
    pub fn from_uri(uri: &Uri) -> Self {
        let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) else {
            return Self::default();
        };
        let param = |name: &str| params.get(name).filter(|v| !v.is_empty());

        Self {
            limit: param(PARAM_LIMIT)
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_LIMIT),
            cursor: param(PARAM_CURSOR).cloned().unwrap_or_default(),
            descending: param(PARAM_SORT).is_some_and(|v| v.eq_ignore_ascii_case("desc")),
            sort_field: param(PARAM_SORT_FIELD).cloned(),
        }
    }
}

impl<S> FromRequestParts<S> for PaginationOptions
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_uri(&parts.uri))
    }
}

/// Cursors of the neighbouring pages; `None` at either end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Build an RFC 5988 `Link` header for `cursor`.
///
/// Links are absolute, rooted at `server_url` (e.g. from
/// [`Config::public_url`](crate::Config::public_url)), and keep every query
/// parameter of `request_uri` except `cursor`. Returns `None` when the
/// cursor has no neighbours.
///
/// # Errors
///
/// Returns `AppError::Internal` if `server_url` lacks a scheme or host.
pub fn link_header(
    server_url: &str,
    path: &str,
    request_uri: &Uri,
    cursor: &Cursor,
) -> AppResult<Option<HeaderValue>> {
    let base: Uri = server_url
        .parse()
        .map_err(|e| AppError::Internal(format!("invalid server URL {server_url:?}: {e}")))?;
    let (Some(scheme), Some(authority)) = (base.scheme_str(), base.authority()) else {
        return Err(AppError::Internal(format!(
            "server URL {server_url:?} needs a scheme and host"
        )));
    };

    let kept: Vec<&str> = request_uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty() && pair.split('=').next() != Some(PARAM_CURSOR))
        .collect();
    let rest = kept.join("&");

    let link = |target: &str, rel: &str| {
        let mut url = format!(
            "{scheme}://{authority}{path}?{PARAM_CURSOR}={}",
            escape(target)
        );
        if !rest.is_empty() {
            url.push('&');
            url.push_str(&rest);
        }
        format!("<{url}>; rel=\"{rel}\"")
    };

    let links: Vec<String> = [("prev", &cursor.prev), ("next", &cursor.next)]
        .into_iter()
        .filter_map(|(rel, target)| target.as_deref().map(|t| link(t, rel)))
        .collect();

    if links.is_empty() {
        return Ok(None);
    }
    HeaderValue::from_str(&links.join(", "))
        .map(Some)
        .map_err(|e| AppError::Internal(format!("invalid Link header: {e}")))
}

/// Append `link` to any `Link` header already present.
pub fn add_link_header(headers: &mut HeaderMap, link: HeaderValue) {
    let merged = headers
        .get(header::LINK)
        .and_then(|existing| existing.to_str().ok())
        .map(|existing| existing.trim_matches(|c| c == ' ' || c == ','))
        .filter(|existing| !existing.is_empty())
        .and_then(|existing| {
            let link = link.to_str().ok()?;
            HeaderValue::from_str(&format!("{existing}, {link}")).ok()
        });

    headers.insert(header::LINK, merged.unwrap_or(link));
}

/// Percent-encode everything outside RFC 3986 unreserved characters.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(char::from(byte));
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
