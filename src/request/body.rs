use axum::extract::{FromRequest, Request};
use axum::http::header;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::error::{AppError, AppResult};

/// Largest request body [`JsonBody`] will read (1 MiB).
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// JSON request body extractor with client-friendly rejections.
///
/// Unlike `axum::Json` it does not require a `Content-Type` header, and
/// every failure is an [`AppError::BadRequest`] whose message says what was
/// wrong: empty body, malformed JSON with its position, a value of the
/// wrong type, an unknown field, or a body over [`MAX_BODY_SIZE`].
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let too_large = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            .is_some_and(|len| len > MAX_BODY_SIZE);
        if too_large {
            return Err(body_too_large());
        }

        let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_SIZE)
            .await
            .map_err(|_| body_too_large())?;

        decode_json(&bytes).map(JsonBody)
    }
}

fn body_too_large() -> AppError {
    AppError::BadRequest("request body must not be larger than 1MB".to_string())
}

/// Decode `bytes` as JSON, mapping failures to [`AppError::BadRequest`].
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> AppResult<T> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::BadRequest(
            "request body must not be empty".to_string(),
        ));
    }

    serde_json::from_slice(bytes).map_err(|e| {
        let message = match e.classify() {
            Category::Syntax => format!(
                "request body contains badly-formed JSON (at line {} column {})",
                e.line(),
                e.column()
            ),
            Category::Eof => "request body contains badly-formed JSON".to_string(),
            Category::Data => describe_data_error(&e),
            Category::Io => format!("failed to read request body: {e}"),
        };
        AppError::BadRequest(message)
    })
}

/// serde reports type and field problems as "<what> at line L column C".
fn describe_data_error(e: &serde_json::Error) -> String {
    let full = e.to_string();
    let what = full
        .rsplit_once(" at line ")
        .map_or(full.as_str(), |(what, _)| what);

    if what.starts_with("unknown field") {
        format!("request body contains {what}")
    } else {
        format!(
            "request body contains an invalid value ({what}) at line {} column {}",
            e.line(),
            e.column()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Body;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(deny_unknown_fields)]
    struct Item {
        name: String,
        qty: u32,
    }

    fn bad_request(err: AppError) -> String {
        match err {
            AppError::BadRequest(msg) => msg,
            other => panic!("expected BadRequest, got {other:?}"),
        }
    }

    async fn extract(body: impl Into<Body>) -> AppResult<Item> {
        let req = axum::http::Request::post("/items")
            .body(body.into())
            .unwrap();
        JsonBody::<Item>::from_request(req, &()).await.map(|b| b.0)
    }

    #[tokio::test]
    async fn test_decodes_valid_body() {
        let item = extract(r#"{"name":"bolt","qty":3}"#).await.unwrap();
        assert_eq!(item, Item {
            name: "bolt".to_string(),
            qty: 3
        });
    }

    #[tokio::test]
    async fn test_empty_body() {
        let msg = bad_request(extract("").await.unwrap_err());
        assert_eq!(msg, "request body must not be empty");
    }

    #[tokio::test]
    async fn test_syntax_error_reports_position() {
        let msg = bad_request(extract(r#"{"name": bolt}"#).await.unwrap_err());
        assert!(msg.starts_with("request body contains badly-formed JSON (at line 1 column"), "{msg}");
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let msg = bad_request(extract(r#"{"name":"bolt""#).await.unwrap_err());
        assert_eq!(msg, "request body contains badly-formed JSON");
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let msg = bad_request(extract(r#"{"name":"bolt","qty":"three"}"#).await.unwrap_err());
        assert!(msg.starts_with("request body contains an invalid value (invalid type"), "{msg}");
    }

    #[tokio::test]
    async fn test_unknown_field() {
        let msg = bad_request(
            extract(r#"{"name":"bolt","qty":1,"colour":"red"}"#)
                .await
                .unwrap_err(),
        );
        assert!(msg.starts_with("request body contains unknown field `colour`"), "{msg}");
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let big = format!(r#"{{"name":"{}","qty":1}}"#, "x".repeat(MAX_BODY_SIZE));
        let msg = bad_request(extract(big).await.unwrap_err());
        assert_eq!(msg, "request body must not be larger than 1MB");
    }
}
