//! Upstream proxy client
//!
//! Forwards the (rewritten) request body to the Anthropic Messages endpoint
//! verbatim and hands the response back to the gateway handler. Upstream
//! failures are passed through; nothing is retried here.

use super::request::ChatRequest;
use super::ApiError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const UPSTREAM_TIMEOUT_SECS: u64 = 600;

/// Headers that must not be copied from the inbound request to the upstream
/// call (hop-by-hop, framing, and routing headers).
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "connection",
    "accept-encoding",
    "transfer-encoding",
    "upgrade",
    "proxy-authorization",
    "te",
    "trailer",
];

pub struct ProxyClient {
    base_url: String,
    client: Client,
}

impl ProxyClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// POST the request to the upstream Messages endpoint. The caller decides
    /// whether to buffer or stream the returned response.
    pub async fn forward(
        &self,
        request: &ChatRequest,
        inbound_headers: &HeaderMap,
        api_key: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = serde_json::to_vec(request)?;

        let mut headers = upstream_headers(inbound_headers);
        if headers.get("x-api-key").is_none() {
            if let Some(key) = api_key {
                if let Ok(value) = HeaderValue::from_str(key) {
                    headers.insert("x-api-key", value);
                }
            }
        }

        debug!(
            url = %url,
            streaming = request.is_streaming(),
            api_key_present = headers.contains_key("x-api-key"),
            "Forwarding request upstream"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .header("content-type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION)
            .body(body)
            .send()
            .await?;

        Ok(response)
    }
}

/// Copy forwardable headers from the inbound request, translating a bearer
/// `Authorization` header into the `x-api-key` form the upstream expects.
fn upstream_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        let lower = name.as_str().to_lowercase();
        if SKIPPED_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if lower == "authorization" {
            if let Some(key) = bearer_token(value) {
                if let Ok(v) = HeaderValue::from_str(key) {
                    headers.insert("x-api-key", v);
                }
            }
            continue;
        }
        if let Ok(n) = HeaderName::from_bytes(name.as_str().as_bytes()) {
            headers.insert(n, value.clone());
        }
    }
    headers
}

/// Extract the credential from the inbound request, preferring `x-api-key`
/// over a bearer `Authorization` header.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("x-api-key") {
        if let Ok(key) = value.to_str() {
            if !key.trim().is_empty() {
                return Some(key.to_string());
            }
        }
    }
    headers
        .get("authorization")
        .and_then(|v| bearer_token(v))
        .map(|s| s.to_string())
}

fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let raw = value.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").or_else(|| raw.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
