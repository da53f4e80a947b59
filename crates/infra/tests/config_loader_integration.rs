//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading client configuration from files
//! and building the client factory from it.

use std::io::Write;
use std::time::Duration;

use porter_domain::PorterError;
use porter_infra::config;
use porter_infra::http::{ClientFactory, RequestContext, Response};
use serde_json::Value;
use tempfile::NamedTempFile;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(extension: &str, contents: &str) -> (NamedTempFile, std::path::PathBuf) {
    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file.write_all(contents.as_bytes()).expect("Failed to write to temp file");

    let path = temp_file.path().with_extension(extension);
    std::fs::copy(temp_file.path(), &path).expect("Failed to copy file");
    (temp_file, path)
}

#[test]
fn test_load_config_from_yaml_file() {
    let yaml_content = r"
clients:
  billing:
    host: https://billing.internal
    hosts:
      - https://billing-b.internal
    storage_folder: /var/lib/porter
    user_agent: porter-billing/1.0
    request:
      retry_limit: 3
      timeout: 2s
    nonce:
      path: /acme/new-nonce
  ledger:
    host: ledger.internal:8443
";

    let (_guard, path) = write_config("yaml", yaml_content);
    let config = config::load_from_file(Some(path.clone())).expect("Failed to load YAML config");

    let billing = &config.clients["billing"];
    assert_eq!(billing.all_hosts(), vec!["https://billing.internal", "https://billing-b.internal"]);
    assert_eq!(billing.user_agent.as_deref(), Some("porter-billing/1.0"));
    let request = billing.request.as_ref().unwrap();
    assert_eq!(request.retry_limit, Some(3));
    assert_eq!(request.timeout, Some(Duration::from_secs(2)));
    assert_eq!(billing.nonce.as_ref().unwrap().header, "Replay-Nonce");

    let factory = ClientFactory::new(&config).expect("Failed to build factory");
    assert_eq!(factory.len(), 2);
    let ledger = factory.get("ledger").unwrap();
    assert_eq!(ledger.hosts(), vec!["https://ledger.internal:8443"]);

    std::fs::remove_file(path).ok();
}

#[test]
fn test_load_config_with_invalid_json() {
    let (_guard, path) = write_config("json", r#"{"clients": {"a": {"host": }}}"#);

    let err = config::load_from_file(Some(path.clone())).unwrap_err();
    assert!(matches!(err, PorterError::Config(_)));

    std::fs::remove_file(path).ok();
}

#[test]
fn test_duplicate_host_fails_factory_load() {
    let json_content = r#"{
        "clients": {
            "primary": {"host": "https://api.internal"},
            "secondary": {"host": "https://api.internal/"}
        }
    }"#;
    let (_guard, path) = write_config("json", json_content);

    let err = ClientFactory::from_file(Some(path.clone())).unwrap_err();
    assert!(matches!(err, PorterError::Config(msg) if msg.contains("duplicate host")));

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn test_factory_client_sends_configured_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/status"))
        .and(header("x-team", "payments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"up": true})))
        .expect(1)
        .mount(&server)
        .await;

    let yaml_content = format!(
        "clients:\n  status:\n    host: {}\n    headers:\n      X-Team: payments\n",
        server.uri()
    );
    let (_guard, path) = write_config("yml", &yaml_content);

    let factory = ClientFactory::from_file(Some(path.clone())).unwrap();
    let client = factory.get("status").unwrap();
    let response: Response<Value> = client.get(&RequestContext::new(), "/v1/status").await.unwrap();
    assert_eq!(response.body.unwrap()["up"], true);

    std::fs::remove_file(path).ok();
}
