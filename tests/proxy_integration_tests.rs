//! # Proxy Integration Tests
//!
//! Drives the full axum application with `axum-test` against a `wiremock`
//! stand-in for the upstream API:
//! - cache miss then hit
//! - request validation and missing credential
//! - rate limiting on misses only
//! - coalescing of concurrent misses
//! - stale-if-error fallback and error surfacing
//! - raw passthrough route
//! - health, readiness, stats and metrics endpoints

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::{TestResponse, TestServer};
use futures::future::join_all;
use metadata_gateway::{GatewayConfig, GatewayServer, ProxyGateway};
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FRESH_CACHE_CONTROL: &str = "public, s-maxage=300, stale-while-revalidate=600";
const STALE_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=600";

struct TestGateway {
    server: TestServer,
    upstream: MockServer,
    gateway: ProxyGateway,
}

async fn setup(configure: impl FnOnce(&mut GatewayConfig)) -> TestGateway {
    let upstream = MockServer::start().await;

    let mut config = GatewayConfig::default();
    config.server.bind_address = "127.0.0.1".to_string();
    config.server.port = 0;
    config.upstream.base_url = upstream.uri();
    config.upstream.api_key = Some("test-key".to_string());
    config.upstream.timeout = Duration::from_secs(2);
    configure(&mut config);

    let gateway_server = GatewayServer::new(&config, None).unwrap();
    let gateway = gateway_server.gateway().clone();
    let server = TestServer::new(gateway_server.router()).unwrap();

    TestGateway {
        server,
        upstream,
        gateway,
    }
}

async fn proxy_get(server: &TestServer, endpoint: &str, client: &'static str) -> TestResponse {
    server
        .get("/api/tmdb")
        .add_query_param("endpoint", endpoint)
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(client),
        )
        .await
}

fn header<'a>(response: &'a TestResponse, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}

#[tokio::test]
async fn test_miss_then_hit() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .and(path("/movie/550"))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Fight Club"})))
        .expect(1)
        .mount(&t.upstream)
        .await;

    let first = proxy_get(&t.server, "movie/550", "203.0.113.1").await;
    assert_eq!(first.status_code(), StatusCode::OK);
    assert_eq!(first.json::<Value>(), json!({"title": "Fight Club"}));
    assert_eq!(header(&first, "x-cache"), Some("MISS"));
    assert_eq!(header(&first, "cache-control"), Some(FRESH_CACHE_CONTROL));
    assert_eq!(header(&first, "x-ratelimit-remaining"), Some("299"));

    let second = proxy_get(&t.server, "/movie/550", "203.0.113.1").await;
    assert_eq!(second.status_code(), StatusCode::OK);
    assert_eq!(second.json::<Value>(), json!({"title": "Fight Club"}));
    assert_eq!(header(&second, "x-cache"), Some("HIT"));
    assert_eq!(header(&second, "x-ratelimit-remaining"), Some("299"));
}

#[tokio::test]
async fn test_missing_endpoint_is_rejected() {
    let t = setup(|_| {}).await;

    let response = t.server.get("/api/tmdb").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "Missing endpoint");
    assert_eq!(header(&response, "cache-control"), Some("no-store"));

    let blank = t.server.get("/api/tmdb").add_query_param("endpoint", "").await;
    assert_eq!(blank.status_code(), StatusCode::BAD_REQUEST);

    assert!(t.upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_endpoint_uses_first_value() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .and(path("/movie/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&t.upstream)
        .await;

    let response = t
        .server
        .get("/api/tmdb")
        .add_query_param("endpoint", "movie/1")
        .add_query_param("endpoint", "movie/2")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"id": 1}));
    assert_eq!(header(&response, "x-cache"), Some("MISS"));
}

#[tokio::test]
async fn test_missing_api_key_is_server_error() {
    let t = setup(|config| config.upstream.api_key = None).await;

    let response = proxy_get(&t.server, "movie/550", "203.0.113.1").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.json::<Value>()["error"], "TMDB API key is missing");
    assert!(t.upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rate_limit_rejects_second_miss() {
    let t = setup(|config| {
        config.rate_limit.max_requests = 1;
        config.rate_limit.window = Duration::from_secs(60);
    })
    .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&t.upstream)
        .await;

    let first = proxy_get(&t.server, "movie/1", "198.51.100.4").await;
    assert_eq!(first.status_code(), StatusCode::OK);

    let second = proxy_get(&t.server, "movie/2", "198.51.100.4").await;
    assert_eq!(second.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&second, "x-ratelimit-remaining"), Some("0"));
    let retry_after: u64 = header(&second, "retry-after").unwrap().parse().unwrap();
    assert!(retry_after > 0 && retry_after <= 60);

    let body = second.json::<Value>();
    assert_eq!(body["error"], "Too many requests");
    assert_eq!(body["retryAfter"], json!(retry_after));

    // Another client still has its own budget.
    let other = proxy_get(&t.server, "movie/2", "198.51.100.5").await;
    assert_eq!(other.status_code(), StatusCode::OK);
    assert_eq!(t.upstream.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cache_hit_bypasses_exhausted_rate_limit() {
    let t = setup(|config| config.rate_limit.max_requests = 1).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
        .mount(&t.upstream)
        .await;

    assert_eq!(
        proxy_get(&t.server, "movie/1", "192.0.2.10").await.status_code(),
        StatusCode::OK
    );
    assert_eq!(
        proxy_get(&t.server, "movie/2", "192.0.2.10").await.status_code(),
        StatusCode::TOO_MANY_REQUESTS
    );

    let hit = proxy_get(&t.server, "movie/1", "192.0.2.10").await;
    assert_eq!(hit.status_code(), StatusCode::OK);
    assert_eq!(header(&hit, "x-cache"), Some("HIT"));
    assert_eq!(header(&hit, "x-ratelimit-remaining"), Some("0"));
}

#[tokio::test]
async fn test_concurrent_misses_share_one_upstream_call() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .and(path("/movie/550"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"title": "Fight Club"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&t.upstream)
        .await;

    let requests = (0..5).map(|_| proxy_get(&t.server, "movie/550", "203.0.113.9"));
    let responses = join_all(requests).await;

    let mut statuses: Vec<_> = responses
        .iter()
        .map(|r| header(r, "x-cache").unwrap_or_default().to_string())
        .collect();
    statuses.sort();
    assert_eq!(statuses, vec!["DEDUPED", "DEDUPED", "DEDUPED", "DEDUPED", "MISS"]);

    for response in &responses {
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!({"title": "Fight Club"}));
    }

    let stats = t.gateway.stats();
    assert_eq!(stats.rate_limiter.requests_allowed, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_stale_if_error_serves_expired_entry() {
    let t = setup(|config| config.cache.fresh_ttl = Duration::from_millis(50)).await;
    Mock::given(method("GET"))
        .and(path("/movie/550"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"title": "Fight Club"})))
        .up_to_n_times(1)
        .mount(&t.upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/movie/550"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&t.upstream)
        .await;

    assert_eq!(
        proxy_get(&t.server, "movie/550", "203.0.113.1").await.status_code(),
        StatusCode::OK
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = proxy_get(&t.server, "movie/550", "203.0.113.1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"title": "Fight Club"}));
    assert_eq!(header(&response, "x-cache"), Some("STALE_IF_ERROR"));
    assert_eq!(header(&response, "cache-control"), Some(STALE_CACHE_CONTROL));
    assert_eq!(t.upstream.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_upstream_error_without_cache_is_surfaced() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"status_message": "The resource could not be found."})),
        )
        .mount(&t.upstream)
        .await;

    let response = proxy_get(&t.server, "movie/0", "203.0.113.1").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let body = response.json::<Value>();
    assert_eq!(body["status"], 404);
    assert_eq!(body["statusText"], "Not Found");
    assert_eq!(body["body"]["status_message"], "The resource could not be found.");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_upstream_timeout_returns_service_unavailable() {
    let t = setup(|config| config.upstream.timeout = Duration::from_millis(200)).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&t.upstream)
        .await;

    let response = proxy_get(&t.server, "movie/550", "203.0.113.1").await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.json::<Value>()["error"].is_string());
    assert!(t.gateway.cache().is_empty());
}

#[tokio::test]
async fn test_text_payload_is_served_as_json_string() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("plain text"))
        .mount(&t.upstream)
        .await;

    let response = proxy_get(&t.server, "configuration", "203.0.113.1").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!("plain text"));
}

#[tokio::test]
async fn test_passthrough_relays_raw_response() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .and(path("/movie/550/credits"))
        .and(query_param("language", "en-US"))
        .and(query_param("api_key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"<xml/>".to_vec(), "application/xml"))
        .mount(&t.upstream)
        .await;

    let response = t
        .server
        .get("/api/tmdb/movie/550/credits")
        .add_query_param("language", "en-US")
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), Some("application/xml"));
    assert_eq!(response.text(), "<xml/>");
    assert!(header(&response, "x-cache").is_none());
}

#[tokio::test]
async fn test_passthrough_failures() {
    let keyless = setup(|config| config.upstream.api_key = None).await;
    let response = keyless.server.get("/api/tmdb/movie/550").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let unreachable = setup(|config| config.upstream.base_url = "http://127.0.0.1:9".to_string()).await;
    let response = unreachable.server.get("/api/tmdb/movie/550").await;
    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let error = response.json::<Value>()["error"].as_str().unwrap().to_string();
    assert!(error.starts_with("Proxy error: "));
    assert!(!error.contains("test-key"));
}

#[tokio::test]
async fn test_operational_endpoints() {
    let t = setup(|_| {}).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
        .mount(&t.upstream)
        .await;
    proxy_get(&t.server, "movie/7", "203.0.113.1").await;
    proxy_get(&t.server, "movie/7", "203.0.113.1").await;

    let health = t.server.get("/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    assert_eq!(health.json::<Value>()["status"], "healthy");

    let ready = t.server.get("/ready").await;
    assert_eq!(ready.status_code(), StatusCode::OK);

    let stats = t.server.get("/stats").await.json::<Value>();
    assert_eq!(stats["cache"]["entries"], 1);
    assert_eq!(stats["cache"]["hits"], 1);
    assert_eq!(stats["cache"]["misses"], 1);
    assert_eq!(stats["rate_limiter"]["requests_allowed"], 1);
    assert_eq!(stats["in_flight"], 0);

    let metrics = t.server.get("/metrics").await;
    assert_eq!(metrics.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_not_ready_without_api_key() {
    let t = setup(|config| config.upstream.api_key = None).await;
    let ready = t.server.get("/ready").await;
    assert_eq!(ready.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(ready.json::<Value>()["checks"]["upstream_credential"], "missing");
}
