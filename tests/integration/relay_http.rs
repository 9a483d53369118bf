//! HTTP surface tests
//!
//! Boots the real axum router over the in-memory stack and drives it with
//! reqwest, checking response bodies and the routing headers.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};

use switchyard::telemetry::InMemoryTelemetryRepo;
use switchyard::{routes, Config, InMemoryChannelSource, RouterState};

use crate::common::channel;
use crate::mocks::ScriptedUpstream;

/// Serve the router on an ephemeral port; returns the bound address
async fn serve(channels: Vec<switchyard::Channel>) -> (SocketAddr, Arc<RouterState>) {
    let source = Arc::new(InMemoryChannelSource::new(channels));
    let upstream = Arc::new(ScriptedUpstream::new());
    let telemetry_repo = Arc::new(InMemoryTelemetryRepo::new());

    let state = Arc::new(
        RouterState::new(Config::default(), source, upstream, telemetry_repo)
            .await
            .expect("state should build without redis"),
    );

    let app = routes::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

#[tokio::test]
async fn test_relay_success_sets_routing_headers() {
    let (addr, _state) = serve(vec![channel(1)]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let headers = response.headers();
    assert!(!headers["x-oneapi-generation-id"].is_empty());
    assert_eq!(headers["x-oneapi-channel"], "1");
    assert_eq!(headers["x-oneapi-channel-name"], "channel-1");
    assert!(headers.contains_key("x-oneapi-latency-ms"));

    let body: Value = response.json().await.unwrap();
    assert!(body.get("choices").is_some());
}

#[tokio::test]
async fn test_relay_missing_model_is_400() {
    let (addr, _state) = serve(vec![channel(1)]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_relay_no_candidates_is_503_with_error_body() {
    let (addr, _state) = serve(vec![]).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "no_candidates");
    assert_eq!(body["error"]["type"], "one_api_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("gpt-4o"));
}

#[tokio::test]
async fn test_relay_group_header_scopes_candidates() {
    let mut vip_only = channel(1);
    vip_only.groups = vec!["vip".to_string()];
    let (addr, _state) = serve(vec![vip_only]).await;

    let client = reqwest::Client::new();
    let default_group = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(default_group.status(), 503);

    let vip = client
        .post(format!("http://{addr}/v1/chat/completions"))
        .header("x-oneapi-group", "vip")
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(vip.status(), 200);
}

#[tokio::test]
async fn test_admin_health_and_reset() {
    let (addr, state) = serve(vec![channel(1)]).await;
    state.health.on_success(1, 120).await;

    let client = reqwest::Client::new();
    let body: Value = client
        .get(format!("http://{addr}/admin/channels/1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["channel_id"], 1);
    assert_eq!(body["success_count"], 1);
    // One success records evidence but is not enough to change status
    assert_eq!(body["status"], "unknown");
    assert_eq!(body["avg_latency"], 120);

    let reset: Value = client
        .post(format!("http://{addr}/admin/channels/1/health/reset"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["reset"], true);

    let body: Value = client
        .get(format!("http://{addr}/admin/channels/1/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "unknown");
    assert_eq!(body["success_count"], 0);
}

#[tokio::test]
async fn test_admin_cache_stats_and_invalidate() {
    let (addr, _state) = serve(vec![channel(1)]).await;
    let client = reqwest::Client::new();

    // Prime the cache with one relay call
    client
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();

    let stats: Value = client
        .get(format!("http://{addr}/admin/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["local_cap"], 1000);
    assert!(stats["source_loads"].as_u64().unwrap() >= 1);

    let invalidated: Value = client
        .post(format!("http://{addr}/admin/cache/invalidate"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(invalidated["invalidated"], true);

    let stats: Value = client
        .get(format!("http://{addr}/admin/cache/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["local_len"], 0);
}

#[tokio::test]
async fn test_service_health_endpoints() {
    let (addr, _state) = serve(vec![]).await;
    let client = reqwest::Client::new();

    for path in ["/health", "/health/ready", "/health/live"] {
        let response = client
            .get(format!("http://{addr}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "{path} should be healthy");
    }

    let body: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert!(body.get("version").is_some());
    assert!(body.get("cache").is_some());
}
