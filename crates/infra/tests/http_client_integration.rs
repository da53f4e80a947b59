//! Integration tests for the retrying HTTP client
//!
//! **Coverage:**
//! - Retry on 503 until success, attempt counting
//! - Non-retriable and exhausted 5xx responses, terminal 429
//! - Multi-host failover on 5xx, 429 and transport errors
//! - The aggregated all-hosts error
//! - Body replay across attempts
//! - Correlation id reuse, context cancellation and deadlines
//! - Bearer and DPoP authorization from a storage folder
//!
//! **Infrastructure:**
//! - WireMock HTTP servers for plain-HTTP scenarios
//! - A recording transport for `https` URLs (auth is never sent over
//!   plain HTTP)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use parking_lot::Mutex;
use porter_infra::http::auth::dpop::Jwk;
use porter_infra::http::{
    retry_up_to, HttpClient, HttpError, Policy, RequestBody, RequestContext, Response,
    RetryReason, Transport, TransportError, TRANSPORT_ERROR_CODE,
};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FAST: Duration = Duration::from_millis(10);

fn fast_policy() -> Policy {
    Policy::default()
        .with_retry_fn(503, retry_up_to(5, FAST, RetryReason::Unavailable))
        .with_retry_fn(502, retry_up_to(5, FAST, RetryReason::Gateway))
}

async fn attempts(server: &MockServer) -> usize {
    server.received_requests().await.map(|r| r.len()).unwrap_or_default()
}

// ============================================================================
// Retry behaviour
// ============================================================================

#[tokio::test]
async fn retries_503_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/ledger"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/ledger"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"balance": 12})))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = HttpClient::builder().host(server.uri()).policy(fast_policy()).build().unwrap();
    let response: Response<Value> = client.get(&RequestContext::new(), "/v1/ledger").await.unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.unwrap()["balance"], 12);
    assert_eq!(attempts(&server).await, 4);
}

#[tokio::test]
async fn unregistered_500_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let client = HttpClient::builder().host(server.uri()).build().unwrap();
    let err = client.get::<Value>(&RequestContext::new(), "/v1/ledger").await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(err.reason(), Some(RetryReason::NonRetriable));
    assert!(matches!(&err, HttpError::Status { body, .. } if body == "boom"));
    assert_eq!(attempts(&server).await, 1);
}

#[tokio::test]
async fn registered_500_exhausts_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let policy = Policy::default()
        .with_total_retry_limit(2)
        .with_retry_fn(500, retry_up_to(10, FAST, RetryReason::Other("server".into())));
    let client = HttpClient::builder().host(server.uri()).policy(policy).build().unwrap();
    let err = client.get::<Value>(&RequestContext::new(), "/v1/ledger").await.unwrap_err();

    assert_eq!(err.reason(), Some(RetryReason::LimitExceeded));
    assert_eq!(attempts(&server).await, 3);
}

#[tokio::test]
async fn structured_error_body_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(409)
                .insert_header("x-request-id", "r-1")
                .set_body_json(json!({"code": 4091, "message": "already posted", "entry": "e-7"})),
        )
        .mount(&server)
        .await;

    let client = HttpClient::builder().host(server.uri()).build().unwrap();
    let err = client
        .post::<Value>(&RequestContext::new(), "/v1/entries", RequestBody::json(&json!({"id": 7})).unwrap())
        .await
        .unwrap_err();

    let body = err.api_body().expect("api error body");
    assert_eq!(body.code, "4091");
    assert_eq!(body.message, "already posted");
    assert_eq!(err.headers().unwrap()["x-request-id"], "r-1");
}

#[tokio::test]
async fn rate_limited_response_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

    let client = HttpClient::builder().host(server.uri()).policy(fast_policy()).build().unwrap();
    let started = std::time::Instant::now();
    let err = client.get::<Value>(&RequestContext::new(), "/v1/items").await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(err.reason(), Some(RetryReason::LimitExceeded));
    assert_eq!(attempts(&server).await, 1);
    assert!(started.elapsed() < Duration::from_millis(500));
}

// ============================================================================
// Failover
// ============================================================================

#[tokio::test]
async fn fails_over_to_next_host() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).expect(1).mount(&a).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"host": "b"})))
        .expect(1)
        .mount(&b)
        .await;

    let policy = Policy::default().with_retry_fn(503, retry_up_to(0, FAST, RetryReason::Unavailable));
    let client = HttpClient::builder().policy(policy).build().unwrap();
    let response: Response<Value> = client
        .request_to_hosts(&RequestContext::new(), Method::GET, [a.uri(), b.uri()], "/v1/ping", RequestBody::empty())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.unwrap()["host"], "b");
}

#[tokio::test]
async fn fails_over_on_rate_limit() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(429)).mount(&a).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"host": "b"})))
        .expect(1)
        .mount(&b)
        .await;

    let client = HttpClient::builder().hosts([a.uri(), b.uri()]).policy(fast_policy()).build().unwrap();
    let response: Response<Value> = client.get(&RequestContext::new(), "/v1/ping").await.unwrap();

    assert_eq!(response.body.unwrap()["host"], "b");
    assert_eq!(attempts(&a).await, 1);
}

#[tokio::test]
async fn fails_over_on_transport_error() {
    // Bind then release a port so nothing is listening on it.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port())
    };
    let b = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"host": "b"})))
        .expect(1)
        .mount(&b)
        .await;

    let policy = Policy::default().without_retry_fn(TRANSPORT_ERROR_CODE);
    let client = HttpClient::builder().policy(policy).build().unwrap();
    let response: Response<Value> = client
        .request_to_hosts(&RequestContext::new(), Method::GET, [dead, b.uri()], "/v1/ping", RequestBody::empty())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body.unwrap()["host"], "b");
}

#[tokio::test]
async fn client_errors_do_not_fail_over() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(400)).mount(&a).await;

    let client = HttpClient::builder().hosts([a.uri(), b.uri()]).build().unwrap();
    let err = client.get::<Value>(&RequestContext::new(), "/v1/ping").await.unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(attempts(&b).await, 0);
}

#[tokio::test]
async fn every_host_failing_is_aggregated() {
    let a = MockServer::start().await;
    let b = MockServer::start().await;
    Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(502)).mount(&a).await;
    Mock::given(method("DELETE")).respond_with(ResponseTemplate::new(504)).mount(&b).await;

    let client =
        HttpClient::builder().hosts([a.uri(), b.uri()]).policy(fast_policy().with_total_retry_limit(1)).build().unwrap();
    let err = client.delete::<Value>(&RequestContext::new(), "/v1/items/3").await.unwrap_err();

    let HttpError::AllHostsFailed { failures, status, .. } = &err else {
        panic!("expected AllHostsFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].host, a.uri());
    assert_eq!(failures[0].path, "/v1/items/3");
    assert!(failures[0].detail.contains("502"));
    assert_eq!(*status, Some(StatusCode::GATEWAY_TIMEOUT));
    assert_eq!(attempts(&a).await, 2);
    assert_eq!(attempts(&b).await, 1);
}

// ============================================================================
// Body replay and correlation
// ============================================================================

#[tokio::test]
async fn body_is_replayed_on_every_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .with_priority(2)
        .mount(&server)
        .await;

    let client = HttpClient::builder().host(server.uri()).policy(fast_policy()).build().unwrap();
    let body = RequestBody::from_reader(&br#"{"x":1}"#[..]).unwrap();
    let response: Response<Value> = client.post(&RequestContext::new(), "/v1/items", body).await.unwrap();
    assert_eq!(response.status, StatusCode::CREATED);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, br#"{"x":1}"#);
    assert_eq!(requests[0].body, requests[1].body);

    let first = requests[0].headers.get("x-correlation-id").expect("correlation id");
    assert_eq!(Some(first), requests[1].headers.get("x-correlation-id"));
}

#[tokio::test]
async fn context_headers_and_correlation_id_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(204)).mount(&server).await;

    let client = HttpClient::builder()
        .host(server.uri())
        .header("x-tenant", "default")
        .caller_identity(|| Some("svc-ledger".to_string()))
        .build()
        .unwrap();
    let ctx = RequestContext::new()
        .with_correlation_id("corr-42")
        .try_with_header("x-tenant", "acme")
        .unwrap();

    let response: Response<Value> = client.get(&ctx, "/v1/ping").await.unwrap();
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(response.body.is_none());

    let requests = server.received_requests().await.unwrap();
    let headers = &requests[0].headers;
    assert_eq!(headers.get("x-correlation-id").unwrap(), "corr-42");
    assert_eq!(headers.get("x-tenant").unwrap(), "acme");
    assert_eq!(headers.get("x-caller-identity").unwrap(), "svc-ledger");
}

#[tokio::test]
async fn request_url_splits_host_and_path() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/items/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::builder().build().unwrap();
    let url = format!("{}/v1/items/9", server.uri());
    let response: Response<Value> = client
        .request_url(&RequestContext::new(), Method::PUT, &url, RequestBody::text("nine"))
        .await
        .unwrap();
    assert_eq!(response.body.unwrap()["ok"], true);
}

#[tokio::test]
async fn writer_receives_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("a,b,c\n")).mount(&server).await;

    let client = HttpClient::builder().host(server.uri()).build().unwrap();
    let mut out = Vec::new();
    let response = client
        .request_to_writer(&RequestContext::new(), Method::GET, "/export.csv", RequestBody::empty(), &mut out)
        .await
        .unwrap();

    assert_eq!(response.body, Some(6));
    assert_eq!(out, b"a,b,c\n");
}

// ============================================================================
// Context
// ============================================================================

#[tokio::test]
async fn cancelled_context_stops_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

    let client = HttpClient::builder().host(server.uri()).build().unwrap();
    let ctx = RequestContext::new();
    ctx.cancel();

    let err = client.get::<Value>(&ctx, "/v1/ping").await.unwrap_err();
    assert!(matches!(err, HttpError::Cancelled));
}

#[tokio::test]
async fn deadline_covers_the_whole_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = HttpClient::builder().host(server.uri()).timeout(Duration::from_millis(150)).build().unwrap();
    let started = std::time::Instant::now();
    let err = client.get::<Value>(&RequestContext::new(), "/slow").await.unwrap_err();

    assert!(matches!(err, HttpError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));
}

// ============================================================================
// Authorization
// ============================================================================

/// Records every request and answers `200 {}`.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, HeaderMap)>>,
}

#[async_trait]
impl Transport for Recorder {
    async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response, TransportError> {
        self.seen.lock().push((request.url().to_string(), request.headers().clone()));
        Ok(http::Response::builder().status(200).body("{}").unwrap().into())
    }
}

// RFC 8037 appendix A key
const ED25519_D: &str = "nWGxne_9WmC6hEr0kuwsxERJxWl7MmkZcDusAxyuf2A";
const ED25519_X: &str = "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo";
const ED25519_JKT: &str = "kPrK_qmxVWaYVA9wwBF6Iuo3vVzz7TxHCTwXBygrS4k";

fn write_host_file(root: &std::path::Path, folder: &str, name: &str, contents: &str) {
    let dir = root.join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(name), contents).unwrap();
}

fn decode_segment(segment: &str) -> Value {
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).unwrap()).unwrap()
}

#[tokio::test]
async fn bearer_token_from_storage_folder() {
    let storage = tempfile::tempdir().unwrap();
    write_host_file(storage.path(), "api.example_8443", ".auth_token", "opaque-token\n");

    let recorder = Arc::new(Recorder::default());
    let client = HttpClient::builder()
        .host("https://api.example:8443")
        .storage_folder(storage.path())
        .transport(recorder.clone())
        .build()
        .unwrap();

    let _: Response<Value> = client.get(&RequestContext::new(), "/v1/me").await.unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen[0].1["authorization"], "Bearer opaque-token");
    assert!(seen[0].1.get("dpop").is_none());
}

#[tokio::test]
async fn plain_http_never_carries_credentials() {
    let storage = tempfile::tempdir().unwrap();
    write_host_file(storage.path(), "api.example_8080", ".auth_token", "opaque-token");

    let recorder = Arc::new(Recorder::default());
    let client = HttpClient::builder()
        .host("http://api.example:8080")
        .storage_folder(storage.path())
        .transport(recorder.clone())
        .build()
        .unwrap();

    let _: Response<Value> = client.get(&RequestContext::new(), "/v1/me").await.unwrap();
    assert!(recorder.seen.lock()[0].1.get("authorization").is_none());
}

#[tokio::test]
async fn dpop_token_signs_every_attempt() {
    let storage = tempfile::tempdir().unwrap();
    let jwk = Jwk {
        kty: "OKP".into(),
        crv: "Ed25519".into(),
        x: ED25519_X.into(),
        y: None,
        d: Some(ED25519_D.into()),
        kid: None,
    };
    write_host_file(storage.path(), "api.example", &format!("{ED25519_JKT}.jwk"), &serde_json::to_string(&jwk).unwrap());
    write_host_file(
        storage.path(),
        "api.example",
        ".auth_token",
        &format!("access_token=tok-1&refresh_token=r-1&dpop_jkt={ED25519_JKT}"),
    );

    let recorder = Arc::new(Recorder::default());
    let client = HttpClient::builder()
        .host("https://api.example")
        .storage_folder(storage.path())
        .transport(recorder.clone())
        .build()
        .unwrap();

    let ctx = RequestContext::new();
    let _: Response<Value> = client.post(&ctx, "/v1/items?draft=1", "{}").await.unwrap();
    let _: Response<Value> = client.get(&ctx, "/v1/items").await.unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].1["authorization"], "DPoP tok-1");

    let proof = seen[0].1["dpop"].to_str().unwrap();
    let parts: Vec<&str> = proof.split('.').collect();
    assert_eq!(parts.len(), 3);

    let header = decode_segment(parts[0]);
    assert_eq!(header["typ"], "dpop+jwt");
    assert_eq!(header["alg"], "EdDSA");
    assert_eq!(header["jwk"]["x"], ED25519_X);
    assert!(header["jwk"].get("d").is_none());

    let claims = decode_segment(parts[1]);
    assert_eq!(claims["htm"], "POST");
    assert_eq!(claims["htu"], "https://api.example/v1/items");
    assert!(claims["iat"].as_i64().is_some());

    let second = seen[1].1["dpop"].to_str().unwrap();
    assert_ne!(proof, second);
    assert_eq!(decode_segment(second.split('.').nth(1).unwrap())["htm"], "GET");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let storage = tempfile::tempdir().unwrap();
    write_host_file(storage.path(), "api.example", ".auth_token", "access_token=old&exp=1000");

    let client = HttpClient::builder()
        .host("https://api.example")
        .storage_folder(storage.path())
        .transport(Arc::new(Recorder::default()))
        .build()
        .unwrap();

    let err = client.get::<Value>(&RequestContext::new(), "/v1/me").await.unwrap_err();
    assert!(matches!(err, HttpError::Auth(_)));
}
