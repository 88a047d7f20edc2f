//! Messages API response structures
//!
//! Responses are forwarded to the caller byte-for-byte; these types exist so
//! the gateway can read usage figures (including cache activity) out of
//! non-streaming responses for logging.

use super::request::ContentBlock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// Token accounting reported by the upstream API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens written to the prompt cache on this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    /// Tokens served from the prompt cache on this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    /// Whether the upstream reported any prompt-cache traffic.
    pub fn has_cache_activity(&self) -> bool {
        self.cache_creation_input_tokens.unwrap_or(0) > 0
            || self.cache_read_input_tokens.unwrap_or(0) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_cache_activity() {
        let none = Usage {
            input_tokens: 100,
            output_tokens: 50,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        };
        assert!(!none.has_cache_activity());

        let read = Usage {
            cache_read_input_tokens: Some(2048),
            ..none.clone()
        };
        assert!(read.has_cache_activity());
    }

    #[test]
    fn test_parse_upstream_response() {
        let raw = json!({
            "id": "msg_01",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "Hello!"}],
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "end_turn",
            "usage": {
                "input_tokens": 2100,
                "output_tokens": 12,
                "cache_creation_input_tokens": 2048
            }
        });
        let resp: ChatResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.usage.input_tokens, 2100);
        assert!(resp.usage.has_cache_activity());
    }
}
