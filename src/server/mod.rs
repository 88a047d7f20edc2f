//! HTTP gateway
//!
//! Accepts Messages API traffic, runs the cache planner over each request
//! body, and forwards the rewritten request upstream. Planning results are
//! surfaced out-of-band: `X-Autocache-*` response headers per request and a
//! `/savings` endpoint aggregating recent history.

use crate::analytics::AnalyticsRecorder;
use crate::api::{extract_api_key, ChatRequest, ChatResponse, ProxyClient};
use crate::cache::{CacheMetadata, CachePlanner, MAX_CACHE_BREAKPOINTS};
use crate::config::Config;
use crate::pricing::format_cost;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Response headers the upstream sets that must not be copied back verbatim
/// (the body may have been decompressed or re-framed in transit).
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub planner: Arc<CachePlanner>,
    pub client: Arc<ProxyClient>,
    pub analytics: AnalyticsRecorder,
    pub config: Arc<Config>,
}

/// Build the gateway router with logging and panic isolation layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/health", get(handle_health))
        .route("/", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/savings", get(handle_savings))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid JSON in request body: {}", err),
            );
        }
    };

    if let Err(err) = request.validate() {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let metadata = if should_bypass(&headers) {
        info!("Bypassing cache planning due to header");
        None
    } else {
        let metadata = state.planner.plan(&mut request);
        state.analytics.record(metadata.clone());
        Some(metadata)
    };

    let api_key = extract_api_key(&headers)
        .or_else(|| state.config.upstream.api_key.clone());

    let upstream = match state
        .client
        .forward(&request, &headers, api_key.as_deref())
        .await
    {
        Ok(response) => response,
        Err(err) => {
            error!(error = %err, "Failed to forward request upstream");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "Failed to forward request to the upstream API",
            );
        }
    };

    let status = upstream.status();
    let mut response_headers = passthrough_headers(upstream.headers());
    match &metadata {
        Some(metadata) => metadata_headers(metadata, &mut response_headers),
        None => {
            response_headers.insert("X-Autocache-Injected", HeaderValue::from_static("false"));
        }
    }

    if request.is_streaming() {
        let body = Body::from_stream(upstream.bytes_stream());
        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        return response;
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "Failed to read upstream response");
            return error_response(StatusCode::BAD_GATEWAY, "Failed to read upstream response");
        }
    };

    if status.is_success() {
        log_usage(&bytes, metadata.as_ref());
    }

    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

/// Surface upstream-reported cache traffic next to our own projection.
fn log_usage(body: &[u8], metadata: Option<&CacheMetadata>) {
    let Ok(response) = serde_json::from_slice::<ChatResponse>(body) else {
        return;
    };
    info!(
        input_tokens = response.usage.input_tokens,
        output_tokens = response.usage.output_tokens,
        cache_creation = response.usage.cache_creation_input_tokens.unwrap_or(0),
        cache_read = response.usage.cache_read_input_tokens.unwrap_or(0),
        planned_cached_tokens = metadata.map(|m| m.cached_tokens).unwrap_or(0),
        "Upstream request completed"
    );
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "strategy": state.planner.strategy().as_str(),
    }))
}

async fn handle_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let panic_stats = state.planner.estimator().panic_stats();
    Json(json!({
        "supported_models": state.planner.pricing().supported_models(),
        "strategies": ["conservative", "moderate", "aggressive"],
        "cache_limits": {
            "max_breakpoints": MAX_CACHE_BREAKPOINTS,
            "min_tokens_default": 1024,
            "min_tokens_haiku": 2048,
            "ttl_options": ["5m", "1h"],
        },
        "tokenizer": {
            "mode": state.config.tokenizer.mode.as_str(),
            "panics_total": panic_stats.panics,
            "fallbacks_total": panic_stats.fallbacks,
        },
    }))
}

async fn handle_savings(State(state): State<AppState>) -> Response {
    Json(state.analytics.snapshot()).into_response()
}

/// Project the planning record onto response headers.
fn metadata_headers(metadata: &CacheMetadata, headers: &mut HeaderMap) {
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };

    set(
        "X-Autocache-Injected",
        metadata.cache_injected.to_string(),
    );
    set("X-Autocache-Total-Tokens", metadata.total_tokens.to_string());
    set(
        "X-Autocache-Cached-Tokens",
        metadata.cached_tokens.to_string(),
    );
    set(
        "X-Autocache-Cache-Ratio",
        format!("{:.3}", metadata.cache_ratio),
    );
    set(
        "X-Autocache-Strategy",
        metadata.strategy.as_str().to_string(),
    );
    set("X-Autocache-Model", metadata.model.clone());

    set(
        "X-Autocache-ROI-FirstCost",
        format_cost(metadata.roi.first_request_cost),
    );
    set(
        "X-Autocache-ROI-Savings",
        format_cost(metadata.roi.subsequent_savings),
    );
    set(
        "X-Autocache-ROI-BreakEven",
        metadata.roi.break_even_requests.to_string(),
    );
    set(
        "X-Autocache-ROI-Percent",
        format!("{:.1}", metadata.roi.percent_savings),
    );

    if !metadata.breakpoints.is_empty() {
        set("X-Autocache-Breakpoints", metadata.breakpoints_header());
    }

    set(
        "X-Autocache-Savings-10req",
        format_cost(metadata.roi.savings_at_10_requests),
    );
    set(
        "X-Autocache-Savings-100req",
        format_cost(metadata.roi.savings_at_100_requests),
    );
}

/// Planning is skipped when the caller opts out per request.
fn should_bypass(headers: &HeaderMap) -> bool {
    for name in ["x-autocache-bypass", "x-autocache-disable"] {
        if let Some(value) = headers.get(name) {
            if let Ok(value) = value.to_str() {
                if value == "true" || value == "1" {
                    return true;
                }
            }
        }
    }
    false
}

fn passthrough_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn error_response(status: StatusCode, message: &str) -> Response {
    let body = json!({
        "error": {
            "type": "autocache_error",
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BreakpointCategory, CacheBreakpoint, CacheTtl, Strategy};
    use crate::pricing::RoiProjection;
    use chrono::Utc;

    fn sample_metadata() -> CacheMetadata {
        CacheMetadata {
            cache_injected: true,
            total_tokens: 4000,
            cached_tokens: 3000,
            cache_ratio: 0.75,
            breakpoints: vec![
                CacheBreakpoint {
                    position: "system".to_string(),
                    tokens: 2000,
                    ttl: CacheTtl::OneHour,
                    category: BreakpointCategory::System,
                    write_price: 0.012,
                    read_savings: 0.0054,
                    break_even: 3,
                    timestamp: Utc::now(),
                },
                CacheBreakpoint {
                    position: "tools".to_string(),
                    tokens: 1000,
                    ttl: CacheTtl::OneHour,
                    category: BreakpointCategory::Tools,
                    write_price: 0.006,
                    read_savings: 0.0027,
                    break_even: 3,
                    timestamp: Utc::now(),
                },
            ],
            roi: RoiProjection {
                first_request_cost: 0.021,
                subsequent_savings: 0.0081,
                break_even_requests: 2,
                savings_at_10_requests: 0.0639,
                savings_at_100_requests: 0.7929,
                percent_savings: 77.1,
                ..RoiProjection::default()
            },
            strategy: Strategy::Moderate,
            model: "claude-3-5-sonnet-20241022".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_metadata_headers_complete() {
        let metadata = sample_metadata();
        let mut headers = HeaderMap::new();
        metadata_headers(&metadata, &mut headers);

        assert_eq!(headers.get("X-Autocache-Injected").unwrap(), "true");
        assert_eq!(headers.get("X-Autocache-Total-Tokens").unwrap(), "4000");
        assert_eq!(headers.get("X-Autocache-Cached-Tokens").unwrap(), "3000");
        assert_eq!(headers.get("X-Autocache-Cache-Ratio").unwrap(), "0.750");
        assert_eq!(headers.get("X-Autocache-Strategy").unwrap(), "moderate");
        assert_eq!(
            headers.get("X-Autocache-Model").unwrap(),
            "claude-3-5-sonnet-20241022"
        );
        assert_eq!(headers.get("X-Autocache-ROI-BreakEven").unwrap(), "2");
        assert_eq!(headers.get("X-Autocache-ROI-Percent").unwrap(), "77.1");
        assert_eq!(
            headers.get("X-Autocache-Breakpoints").unwrap(),
            "system:2000:1h,tools:1000:1h"
        );
    }

    #[test]
    fn test_breakpoints_header_omitted_when_empty() {
        let mut metadata = sample_metadata();
        metadata.breakpoints.clear();
        metadata.cache_injected = false;
        let mut headers = HeaderMap::new();
        metadata_headers(&metadata, &mut headers);

        assert_eq!(headers.get("X-Autocache-Injected").unwrap(), "false");
        assert!(headers.get("X-Autocache-Breakpoints").is_none());
    }

    #[test]
    fn test_should_bypass_variants() {
        for (name, value, expected) in [
            ("x-autocache-bypass", "true", true),
            ("x-autocache-bypass", "1", true),
            ("x-autocache-disable", "true", true),
            ("x-autocache-bypass", "false", false),
            ("x-autocache-bypass", "yes", false),
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(name, HeaderValue::from_static(value));
            assert_eq!(should_bypass(&headers), expected, "{}={}", name, value);
        }
        assert!(!should_bypass(&HeaderMap::new()));
    }

    #[test]
    fn test_passthrough_headers_skip_framing() {
        let mut upstream = HeaderMap::new();
        upstream.insert("content-encoding", HeaderValue::from_static("gzip"));
        upstream.insert("content-length", HeaderValue::from_static("100"));
        upstream.insert("request-id", HeaderValue::from_static("req_123"));

        let headers = passthrough_headers(&upstream);
        assert!(headers.get("content-encoding").is_none());
        assert!(headers.get("content-length").is_none());
        assert_eq!(headers.get("request-id").unwrap(), "req_123");
    }
}
