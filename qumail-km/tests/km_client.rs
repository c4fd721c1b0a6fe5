//! Key Manager client tests against a fake Key Manager

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mockito::{Matcher, Server};
use qumail_core::{ErrorCategory, KeySource, KeyType};
use qumail_km::simulator::is_simulated_key_id;
use qumail_km::{KeyManagerApi, KmClient, KmConfig, KmError, LinkStatus};
use secrecy::ExposeSecret;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const UNREACHABLE: &str = "http://127.0.0.1:1";

fn config(base_url: &str) -> KmConfig {
    KmConfig {
        base_url: base_url.to_string(),
        api_key: "km-secret".to_string(),
        request_timeout_ms: 2_000,
        status_timeout_ms: 1_000,
        ..KmConfig::default()
    }
}

fn key_body(key_id: &str, material: &[u8], key_type: &str) -> String {
    json!({
        "key_ID": key_id,
        "key": STANDARD.encode(material),
        "size": material.len(),
        "metadata": {
            "generation_time": "2024-05-01T12:00:00",
            "source": "qkd-node-a",
            "type": key_type
        }
    })
    .to_string()
}

#[tokio::test]
async fn test_request_key_from_km() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/keys/get_key")
        .match_header("authorization", "Bearer km-secret")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "size": 32,
            "additional_slave_SAE_IDs": ["bob@example.com"],
            "extension_mandatory": [],
            "extension_optional": []
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(key_body("km-0001", &[0x42u8; 32], "symmetric"))
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let key = client.request_key("bob@example.com", 32).await.unwrap();

    assert_eq!(key.key_id(), "km-0001");
    assert_eq!(key.size(), 32);
    assert_eq!(key.source(), KeySource::KeyManager);
    assert_eq!(key.key_type(), KeyType::Symmetric);
    assert_eq!(key.material().expose_secret(), &vec![0x42u8; 32]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_request_key_reports_asymmetric_type() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/keys/get_key")
        .with_status(200)
        .with_body(key_body("km-pub", &[1u8; 64], "asymmetric"))
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let key = client.request_key("bob@example.com", 64).await.unwrap();
    assert_eq!(key.key_type(), KeyType::Asymmetric);
}

#[tokio::test]
async fn test_non_success_status_is_protocol_failure() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/keys/get_key")
        .with_status(500)
        .with_body("key pool exhausted")
        .expect(1)
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let error = client.request_key("bob@example.com", 32).await.unwrap_err();

    match &error {
        KmError::Protocol { status, body } => {
            assert_eq!(*status, 500);
            assert_eq!(body, "key pool exhausted");
        }
        other => panic!("expected protocol failure, got {other:?}"),
    }
    assert_eq!(error.category(), ErrorCategory::Protocol);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_short_key_is_invalid_response() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/keys/get_key")
        .with_status(200)
        .with_body(key_body("km-short", &[1u8; 8], "symmetric"))
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    assert!(matches!(
        client.request_key("bob@example.com", 32).await,
        Err(KmError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_unparseable_body_is_invalid_response() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/keys/get_key")
        .with_status(200)
        .with_body("<html>gateway</html>")
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    assert!(matches!(
        client.request_key("bob@example.com", 32).await,
        Err(KmError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_unreachable_km_falls_back_to_simulator() {
    let client = KmClient::new(config(UNREACHABLE)).unwrap();
    let key = client.request_key("bob@example.com", 48).await.unwrap();

    assert!(is_simulated_key_id(key.key_id()));
    assert_eq!(key.source(), KeySource::Simulator);
    assert_eq!(key.size(), 48);
}

#[tokio::test]
async fn test_silent_km_times_out_to_simulator() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let mut km = config(&format!("http://{address}"));
    km.request_timeout_ms = 200;
    let client = KmClient::new(km).unwrap();

    let started = Instant::now();
    let key = client.request_key("bob@example.com", 32).await.unwrap();

    assert_eq!(key.source(), KeySource::Simulator);
    assert!(is_simulated_key_id(key.key_id()));
    assert!(started.elapsed() < Duration::from_secs(2));
    silent.abort();
}

#[tokio::test]
async fn test_fallback_can_be_disabled() {
    let mut km = config(UNREACHABLE);
    km.allow_simulator_fallback = false;
    let client = KmClient::new(km).unwrap();

    let error = client.request_key("bob@example.com", 48).await.unwrap_err();
    assert!(matches!(error, KmError::Transport(_)));
    assert!(error.is_recoverable());
}

#[tokio::test]
async fn test_zero_length_request_rejected_before_network() {
    let client = KmClient::new(config(UNREACHABLE)).unwrap();
    let error = client.request_key("bob@example.com", 0).await.unwrap_err();
    assert_eq!(error.category(), ErrorCategory::InvalidRequest);
}

#[tokio::test]
async fn test_retrieve_key_by_id() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/keys/dec_keys")
        .match_query(Matcher::UrlEncoded(
            "master_SAE_ID".to_string(),
            "alice@example.com".to_string(),
        ))
        .match_header("authorization", "Bearer km-secret")
        .match_body(Matcher::Json(json!({"key_IDs": [{"key_ID": "km-0001"}]})))
        .with_status(200)
        .with_body(
            json!({"keys": [{"key_ID": "km-0001", "key": STANDARD.encode([9u8; 16])}]})
                .to_string(),
        )
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let key = client
        .retrieve_key_by_id("km-0001", "alice@example.com")
        .await
        .unwrap();

    assert_eq!(key.key_id(), "km-0001");
    assert_eq!(key.material().expose_secret(), &vec![9u8; 16]);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_retrieve_missing_key_in_container() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/api/v1/keys/dec_keys")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(json!({"keys": []}).to_string())
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    assert!(matches!(
        client.retrieve_key_by_id("km-0001", "alice@example.com").await,
        Err(KmError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_retrieve_never_falls_back() {
    let client = KmClient::new(config(UNREACHABLE)).unwrap();
    assert!(matches!(
        client.retrieve_key_by_id("km-0001", "alice@example.com").await,
        Err(KmError::Transport(_))
    ));

    let error = client
        .retrieve_key_by_id("sim_qkd_00112233445566778899aabbccddeeff", "alice@example.com")
        .await
        .unwrap_err();
    assert_eq!(error.category(), ErrorCategory::InvalidRequest);
}

#[tokio::test]
async fn test_check_connection_healthy() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/status")
        .match_header("authorization", "Bearer km-secret")
        .with_status(200)
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let status = client.check_connection().await;
    assert!(status.connected);
    assert_eq!(status.status, LinkStatus::Connected);
    assert!(status.response_time_ms.is_some());
}

#[tokio::test]
async fn test_check_connection_error_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/api/v1/status")
        .with_status(503)
        .create_async()
        .await;

    let client = KmClient::new(config(&server.url())).unwrap();
    let status = client.check_connection().await;
    assert!(!status.connected);
    assert_eq!(status.status, LinkStatus::Error);
}

#[tokio::test]
async fn test_check_connection_unreachable() {
    let client = KmClient::new(config(UNREACHABLE)).unwrap();

    let started = Instant::now();
    let status = client.check_connection().await;

    assert!(!status.connected);
    assert_eq!(status.status, LinkStatus::ConnectionError);
    assert_eq!(status.response_time_ms, None);
    assert!(started.elapsed() < Duration::from_millis(1_000) + Duration::from_secs(1));
}
