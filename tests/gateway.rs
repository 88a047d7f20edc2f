//! Integration tests for the gateway HTTP endpoints
//!
//! Upstream-forwarding paths point at an unroutable address, so tests only
//! exercise behavior that is decided inside the gateway: request rejection,
//! bypass handling, and the observability endpoints.

use autocache::tokenizer::HeuristicEstimator;
use autocache::{
    AnalyticsRecorder, AppState, CachePlanner, ConfigBuilder, PricingTable, ProxyClient, Strategy,
};
use axum::body::Body;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

fn make_state() -> (AppState, AnalyticsRecorder) {
    let config = ConfigBuilder::new()
        .upstream_url("http://127.0.0.1:1")
        .strategy(Strategy::Moderate)
        .history_size(10)
        .build();
    let planner = CachePlanner::new(
        Arc::new(HeuristicEstimator::new()),
        Arc::new(PricingTable::new()),
        config.cache.strategy,
    );
    let analytics = AnalyticsRecorder::new(config.analytics.history_size, config.cache.strategy);
    let state = AppState {
        planner: Arc::new(planner),
        client: Arc::new(ProxyClient::new(config.upstream.base_url.clone())),
        analytics: analytics.clone(),
        config: Arc::new(config),
    };
    (state, analytics)
}

fn get_request(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_messages(body: serde_json::Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_strategy() {
    let (state, _) = make_state();
    let response = autocache::router(state)
        .oneshot(get_request("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json = read_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["strategy"], "moderate");
}

#[tokio::test]
async fn metrics_lists_models_and_limits() {
    let (state, _) = make_state();
    let response = autocache::router(state)
        .oneshot(get_request("/metrics"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json = read_json(response).await;
    assert!(json["supported_models"].as_array().unwrap().len() >= 10);
    assert_eq!(json["cache_limits"]["max_breakpoints"], 4);
    assert_eq!(json["cache_limits"]["min_tokens_haiku"], 2048);
    assert_eq!(json["tokenizer"]["panics_total"], 0);
}

#[tokio::test]
async fn savings_snapshot_has_expected_shape() {
    let (state, _) = make_state();
    let response = autocache::router(state)
        .oneshot(get_request("/savings"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let json = read_json(response).await;
    assert_eq!(json["aggregated_stats"]["total_requests"], 0);
    assert!(json["recent_requests"].as_array().unwrap().is_empty());
    assert!(json["debug_info"]["breakpoints_by_type"].is_object());
    assert_eq!(json["config"]["history_size"], 10);
    assert_eq!(json["config"]["strategy"], "moderate");
}

#[tokio::test]
async fn invalid_json_is_rejected() {
    let (state, _) = make_state();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = autocache::router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), 400);
    let json = read_json(response).await;
    assert_eq!(json["error"]["type"], "autocache_error");
}

#[tokio::test]
async fn empty_messages_are_rejected() {
    let (state, analytics) = make_state();
    let response = autocache::router(state)
        .oneshot(post_messages(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 100,
            "messages": []
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    // Rejected requests never reach the planner
    assert!(analytics.is_empty());
}

#[tokio::test]
async fn invalid_role_is_rejected() {
    let (state, _) = make_state();
    let response = autocache::router(state)
        .oneshot(post_messages(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 100,
            "messages": [{"role": "operator", "content": "hi"}]
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn planning_records_analytics_even_when_upstream_is_down() {
    let (state, analytics) = make_state();
    let response = autocache::router(state)
        .oneshot(post_messages(json!({
            "model": "claude-3-5-sonnet-20241022",
            "max_tokens": 100,
            "system": "You are a helpful assistant. ".repeat(100),
            "messages": [{"role": "user", "content": "Hello"}]
        })))
        .await
        .unwrap();
    // No upstream listening: the forward fails after planning
    assert_eq!(response.status(), 502);
    assert_eq!(analytics.len(), 1);
    let snapshot = analytics.snapshot();
    assert_eq!(snapshot.aggregated_stats.requests_with_cache, 1);
    assert_eq!(snapshot.debug_info.breakpoints_by_type.system, 1);
}

#[tokio::test]
async fn bypass_header_skips_planning() {
    let (state, analytics) = make_state();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-autocache-bypass", "true")
        .body(Body::from(
            serde_json::to_string(&json!({
                "model": "claude-3-5-sonnet-20241022",
                "max_tokens": 100,
                "system": "You are a helpful assistant. ".repeat(100),
                "messages": [{"role": "user", "content": "Hello"}]
            }))
            .unwrap(),
        ))
        .unwrap();
    let response = autocache::router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), 502);
    // The planner was never invoked for the bypassed request
    assert!(analytics.is_empty());
}
