#![allow(clippy::unwrap_used)]
// Integration tests for `VendorClient` using wiremock.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use micsync_api::{
    Error, RateLimitConfig, RateLimiter, RetryPolicy, SharedSecret, TransportConfig, VendorClient,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        default_cooldown: Duration::from_millis(50),
    }
}

fn roomy_limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(RateLimitConfig {
        capacity: 1_000,
        refill_per_sec: 1_000.0,
        max_wait: Duration::from_secs(5),
    }))
}

async fn setup_with(retry: RetryPolicy) -> (MockServer, VendorClient, Arc<RateLimiter>) {
    let server = MockServer::start().await;
    let limiter = roomy_limiter();
    let secret: secrecy::SecretString = "s3cret".to_string().into();
    let client = VendorClient::new(
        "shure",
        &server.uri(),
        SharedSecret::new("key-1", secret),
        TransportConfig::default(),
        Arc::clone(&limiter),
        retry,
    )
    .unwrap();
    (server, client, limiter)
}

async fn setup() -> (MockServer, VendorClient) {
    let (server, client, _) = setup_with(fast_retry(3)).await;
    (server, client)
}

// ── Listing ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_devices_bare_array() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "rx-1", "ipAddress": "10.0.0.1"},
            {"id": "rx-2", "ipAddress": "10.0.0.2"}
        ])))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[1]["id"], "rx-2");
}

#[tokio::test]
async fn test_list_devices_follows_edge_cursors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(query_param("after", "cursor-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "edges": [{"node": {"id": "rx-3"}}],
            "pageInfo": {"hasNextPage": false, "endCursor": "cursor-2"}
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "edges": [{"node": {"id": "rx-1"}}, {"node": {"id": "rx-2"}}],
            "pageInfo": {"hasNextPage": true, "endCursor": "cursor-1"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    let ids: Vec<&str> = devices.iter().filter_map(|d| d["id"].as_str()).collect();
    assert_eq!(ids, vec!["rx-1", "rx-2", "rx-3"]);
}

#[tokio::test]
async fn test_repeated_cursor_stops_pagination() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "edges": [{"node": {"id": "rx-1"}}],
            "pageInfo": {"hasNextPage": true, "endCursor": "stuck"}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert!(
        matches!(&err, Error::Deserialization { message, .. } if message.contains("repeated")),
        "expected repeated-cursor error, got: {err:?}"
    );
}

#[tokio::test]
async fn test_device_detail_fetches_body_and_channels() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices/rx-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "rx-1", "name": "Stage Left"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices/rx-1/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"channelNumber": 1}, {"channelNumber": 2}]
        })))
        .mount(&server)
        .await;

    let detail = client.get_device_detail("rx-1").await.unwrap();
    assert_eq!(detail.device["name"], "Stage Left");
    assert_eq!(detail.channels.len(), 2);
}

#[tokio::test]
async fn test_credentials_sent_on_every_request() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .and(header("X-Api-Key", "key-1"))
        .and(header("X-Api-Secret", "s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let probe = client.health_check().await.unwrap();
    assert_eq!(probe.device_count, 0);
}

// ── Error classification & retry ────────────────────────────────────

#[tokio::test]
async fn test_server_error_is_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices/rx-1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices/rx-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "rx-1"})))
        .mount(&server)
        .await;

    let device = client.get_device("rx-1").await.unwrap();
    assert_eq!(device["id"], "rx-1");
}

#[tokio::test]
async fn test_server_error_surfaces_after_attempts_exhausted() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .expect(3)
        .mount(&server)
        .await;

    let result = client.list_devices().await;
    match result {
        Err(Error::Server { status, message }) => {
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Server error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_unauthorized_is_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_devices().await;
    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_not_found_is_client_error_without_retry() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.get_device("ghost").await.unwrap_err();
    assert!(err.is_not_found(), "expected 404 client error, got: {err:?}");
}

#[tokio::test]
async fn test_unfollowed_redirect_is_client_error_without_retry() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices/rx-1"))
        .respond_with(ResponseTemplate::new(300))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.get_device("rx-1").await.unwrap_err();
    assert!(
        matches!(err, Error::Client { status: 300, .. }),
        "expected client error, got: {err:?}"
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limited_reply_starts_cooldown() {
    let (server, client, limiter) = setup_with(fast_retry(1)).await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.list_devices().await.unwrap_err();
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));
    assert!(
        limiter.try_acquire("shure").await.is_none(),
        "vendor bucket should be cooling down"
    );
    assert!(limiter.try_acquire("sennheiser").await.is_some());
}

#[tokio::test]
async fn test_rate_limited_then_success_uses_default_cooldown() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "rx-1"}])))
        .mount(&server)
        .await;

    let devices = client.list_devices().await.unwrap();
    assert_eq!(devices.len(), 1);
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_list_discovery_candidates() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/config/discovery/ips"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ips": ["10.0.0.1", "10.0.0.5"]})),
        )
        .mount(&server)
        .await;

    let ips = client.list_discovery_candidates().await.unwrap();
    assert_eq!(ips, vec!["10.0.0.1".to_owned(), "10.0.0.5".to_owned()]);
}

#[tokio::test]
async fn test_set_discovery_candidates_puts_full_list() {
    let (server, client) = setup().await;

    Mock::given(method("PUT"))
        .and(path("/config/discovery/ips"))
        .and(body_json(json!({"ips": ["10.0.0.1", "10.0.0.9"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client
        .set_discovery_candidates(&["10.0.0.1".into(), "10.0.0.9".into()])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_remove_discovery_candidates_patches() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/config/discovery/ips/remove"))
        .and(body_json(json!({"ips": ["10.0.0.9"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .remove_discovery_candidates(&["10.0.0.9".into()])
        .await
        .unwrap();
}

// ── Push ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_without_push_endpoint_fails() {
    let (_server, client) = setup().await;

    let result = client.subscribe(
        "rx-1",
        micsync_api::ReconnectConfig::default(),
        tokio_util::sync::CancellationToken::new(),
    );
    assert!(matches!(result, Err(Error::WebSocketConnect(_))));
}
