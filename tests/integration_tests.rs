//! End-to-end tests against a real listener.
//!
//! Each test starts its own server on an ephemeral port so limiter state is
//! never shared between tests. Requests arrive over TCP, so the peer address
//! fallback for rate limit keys is exercised the same way as in production.
//!
//! Run with: `cargo test --test integration_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use axum::http::Uri;
use axum::response::{IntoResponse, Response};
use obvious_server::middleware::{Algorithm, KeyExtractor};
use obvious_server::request::{
    Cursor, JsonBody, ListResponse, PaginationOptions, Reply, SingleResponse, add_link_header,
    link_header,
};
use obvious_server::{Api, AppResult, Config, Server, ServerVersion};
use serde::Deserialize;
use reqwest::{Client, StatusCode};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;

struct Hello;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Item {
    name: String,
}

impl Api for Hello {
    fn name(&self) -> &str {
        "hello"
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/hello", get(|| async { "hello" }))
            .route(
                "/items",
                get(list_items).post(|JsonBody(item): JsonBody<Item>| async move {
                    Reply::new(StatusCode::CREATED, SingleResponse::new(item.name))
                }),
            )
    }
}

/// Pages over "a".."e"; the cursor is the index of the first item.
async fn list_items(opts: PaginationOptions, uri: Uri) -> AppResult<Response> {
    let items = ["a", "b", "c", "d", "e"];
    let start: usize = opts.cursor.parse().unwrap_or(0);
    let page: Vec<&str> = items.iter().skip(start).take(opts.limit).copied().collect();
    let end = start + page.len();
    let cursor = Cursor {
        prev: (start > 0).then(|| start.saturating_sub(opts.limit).to_string()),
        next: (end < items.len()).then(|| end.to_string()),
    };

    let link = link_header("https://api.example.com", uri.path(), &uri, &cursor)?;
    let mut response = Reply::ok(ListResponse::new(page, cursor)).into_response();
    if let Some(link) = link {
        add_link_header(response.headers_mut(), link);
    }
    Ok(response)
}

/// Running server plus a handle to stop it.
struct TestFixture {
    base_url: String,
    client: Client,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<obvious_server::AppResult<()>>>,
}

impl TestFixture {
    async fn new(config: Config) -> Self {
        Self::with_server(Server::new(config)).await
    }

    async fn with_server(server: Server) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr: SocketAddr = listener.local_addr().expect("Failed to get local address");

        let (tx, rx) = oneshot::channel::<()>();
        let server = server.with_apis([Arc::new(Hello) as Arc<dyn Api>]);
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn get_with(&self, path: &str, name: &str, value: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header(name, value)
            .send()
            .await
            .unwrap()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await.unwrap().unwrap();
        }
    }
}

fn limited(requests: u32, window: Duration, algorithm: Algorithm) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        rate_limit_enabled: true,
        rate_limit_requests: requests,
        rate_limit_window: window,
        rate_limit_algorithm: algorithm,
        log_level: "warn".to_string(),
        ..Config::default()
    }
}

// ============================================================================
// Rate Limiting Tests
// ============================================================================

#[tokio::test]
async fn test_rate_limit_denies_then_recovers() {
    let fixture = TestFixture::new(limited(
        2,
        Duration::from_millis(300),
        Algorithm::SlidingWindow,
    ))
    .await;

    for _ in 0..2 {
        let response = fixture.get("/hello").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-window"], "300ms");
    }

    let denied = fixture.get("/hello").await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers()["x-ratelimit-retry-after"], "1");
    assert!(
        denied
            .text()
            .await
            .unwrap()
            .starts_with("Rate limit exceeded. Try again in ")
    );

    sleep(Duration::from_millis(350)).await;
    assert_eq!(fixture.get("/hello").await.status(), StatusCode::OK);

    fixture.stop().await;
}

#[tokio::test]
async fn test_token_bucket_reports_wait() {
    let fixture = TestFixture::new(limited(
        3,
        Duration::from_secs(1),
        Algorithm::TokenBucket,
    ))
    .await;

    for _ in 0..3 {
        assert_eq!(fixture.get("/hello").await.status(), StatusCode::OK);
    }

    let denied = fixture.get("/hello").await;
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(denied.headers()["x-ratelimit-window"], "1s");
    let retry: u64 = denied.headers()["x-ratelimit-retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry >= 1);

    fixture.stop().await;
}

#[tokio::test]
async fn test_header_extractor_partitions_quota() {
    let config = Config {
        rate_limit_key_extractor: KeyExtractor::Header,
        ..limited(1, Duration::from_secs(60), Algorithm::FixedWindow)
    };
    let fixture = TestFixture::new(config).await;

    let first = fixture.get_with("/hello", "X-API-Key", "tenant-a").await;
    assert_eq!(first.status(), StatusCode::OK);

    let again = fixture.get_with("/hello", "X-API-Key", "tenant-a").await;
    assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = fixture.get_with("/hello", "X-API-Key", "tenant-b").await;
    assert_eq!(other.status(), StatusCode::OK);

    // No header: keyed by the peer address, which has its own quota
    assert_eq!(fixture.get("/hello").await.status(), StatusCode::OK);
    assert_eq!(
        fixture.get("/hello").await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    fixture.stop().await;
}

#[tokio::test]
async fn test_forwarded_for_partitions_quota() {
    let fixture = TestFixture::new(limited(
        1,
        Duration::from_secs(60),
        Algorithm::TokenBucket,
    ))
    .await;

    let a = fixture
        .get_with("/hello", "X-Forwarded-For", "203.0.113.1, 10.0.0.1")
        .await;
    assert_eq!(a.status(), StatusCode::OK);

    let b = fixture
        .get_with("/hello", "X-Forwarded-For", "203.0.113.2")
        .await;
    assert_eq!(b.status(), StatusCode::OK);

    let a_again = fixture
        .get_with("/hello", "X-Forwarded-For", "203.0.113.1")
        .await;
    assert_eq!(a_again.status(), StatusCode::TOO_MANY_REQUESTS);

    fixture.stop().await;
}

#[tokio::test]
async fn test_disabled_rate_limit_is_transparent() {
    let fixture = TestFixture::new(Config {
        rate_limit_requests: 1,
        ..Config::default()
    })
    .await;

    for _ in 0..20 {
        let response = fixture.get("/hello").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }

    fixture.stop().await;
}

// ============================================================================
// Built-in Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_healthz_reflects_registered_checks() {
    let server = Server::new(Config::default())
        .with_health_check("cache", || Ok(()))
        .with_health_check("db", || Err(anyhow::anyhow!("db unreachable")));
    let fixture = TestFixture::with_server(server).await;

    let response = fixture.get("/healthz").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "db unreachable");

    fixture.stop().await;
}

#[tokio::test]
async fn test_version_endpoint() {
    let server = Server::new(Config::default()).with_version(ServerVersion::new(
        "abc123",
        "v1.2.0",
        "2026-01-01T00:00:00Z",
    ));
    let fixture = TestFixture::with_server(server).await;

    let body: serde_json::Value = fixture.get("/version").await.json().await.unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "revision": "abc123",
            "tag": "v1.2.0",
            "time": "2026-01-01T00:00:00Z",
        })
    );

    fixture.stop().await;
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let fixture = TestFixture::new(Config::default()).await;

    let response = fixture.get("/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    fixture.stop().await;
}

// ============================================================================
// Handler Helper Tests
// ============================================================================

#[tokio::test]
async fn test_json_body_created_and_rejected() {
    let fixture = TestFixture::new(Config::default()).await;

    let created = fixture
        .client
        .post(fixture.url("/items"))
        .body(r#"{"name":"bolt"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body: serde_json::Value = created.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"status": {"success": true}, "data": "bolt"}));

    let rejected = fixture
        .client
        .post(fixture.url("/items"))
        .body(r#"{"name":"bolt","size":3}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = rejected.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("request body contains unknown field `size`")
    );

    let empty = fixture
        .client
        .post(fixture.url("/items"))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = empty.json().await.unwrap();
    assert_eq!(body["message"], "request body must not be empty");

    fixture.stop().await;
}

#[tokio::test]
async fn test_listing_pages_with_link_header() {
    let fixture = TestFixture::new(Config::default()).await;

    let response = fixture.get("/items?limit=2&cursor=2").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["link"],
        "<https://api.example.com/items?cursor=0&limit=2>; rel=\"prev\", \
         <https://api.example.com/items?cursor=4&limit=2>; rel=\"next\""
    );
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["count"], 2);
    assert_eq!(body["data"], serde_json::json!(["c", "d"]));
    assert_eq!(body["cursor"], serde_json::json!({"prev": "0", "next": "4"}));

    let whole = fixture.get("/items").await;
    assert!(whole.headers().get("link").is_none());
    let body: serde_json::Value = whole.json().await.unwrap();
    assert_eq!(body["count"], 5);

    fixture.stop().await;
}

// ============================================================================
// Header Tests
// ============================================================================

#[tokio::test]
async fn test_security_and_correlation_headers() {
    let fixture = TestFixture::new(Config::default()).await;

    let response = fixture
        .get_with("/hello", "X-Correlation-ID", "order-42")
        .await;
    let headers = response.headers();

    assert_eq!(headers["x-correlation-id"], "order-42");
    assert!(headers.contains_key("x-request-id"));
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.get("strict-transport-security").is_none());

    let proxied = fixture
        .get_with("/hello", "X-Forwarded-Proto", "https")
        .await;
    assert_eq!(
        proxied.headers()["strict-transport-security"],
        "max-age=31536000; includeSubDomains"
    );

    fixture.stop().await;
}
