//! Token counting for cache eligibility decisions
//!
//! Two interchangeable backends sit behind the [`TokenEstimator`] trait: a
//! byte-pair encoder for accurate counts and a character heuristic that is
//! cheap and never fails. Composition rules (per-block, per-message, and
//! per-request overheads) are shared by both backends so eligibility
//! thresholds behave the same regardless of configuration.

mod exact;
mod heuristic;

pub use exact::BpeEstimator;
pub use heuristic::HeuristicEstimator;

use crate::api::request::{ChatRequest, ContentBlock, Message, SystemPrompt, ToolDefinition};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Fixed token cost of an image block
pub const IMAGE_BLOCK_TOKENS: usize = 85;
/// Framing overhead per text block
const TEXT_BLOCK_OVERHEAD: usize = 2;
/// Role and wrapping overhead per message
const MESSAGE_OVERHEAD: usize = 3;
/// Structure overhead per tool definition
const TOOL_OVERHEAD: usize = 5;
/// Overhead for the system field itself
const SYSTEM_OVERHEAD: usize = 2;
/// Base overhead for the request envelope
const REQUEST_OVERHEAD: usize = 5;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("failed to load tokenizer vocabulary: {0}")]
    VocabularyLoad(String),
}

/// Counters for the exact backend's panic recovery path
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PanicStats {
    /// Panics caught at the encoder boundary
    pub panics: u64,
    /// Calls answered by the heuristic fallback
    pub fallbacks: u64,
}

/// Token counting capability shared by both backends.
///
/// Only `count_tokens` differs per backend; the structural composition rules
/// are provided methods so every backend prices blocks, messages, tools, and
/// whole requests identically.
pub trait TokenEstimator: Send + Sync {
    /// Count tokens in a piece of text. Never fails; empty input counts 0.
    fn count_tokens(&self, text: &str) -> usize;

    fn count_content_block(&self, block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text, .. } => self.count_tokens(text) + TEXT_BLOCK_OVERHEAD,
            ContentBlock::Image { .. } => IMAGE_BLOCK_TOKENS,
            // Tool traffic is forwarded untouched and not counted toward
            // cacheable prefixes
            ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => 0,
        }
    }

    fn count_message(&self, message: &Message) -> usize {
        MESSAGE_OVERHEAD
            + message
                .content
                .iter()
                .map(|block| self.count_content_block(block))
                .sum::<usize>()
    }

    fn count_tool(&self, tool: &ToolDefinition) -> usize {
        let schema = serde_json::to_string(&tool.input_schema).unwrap_or_default();
        TOOL_OVERHEAD
            + self.count_tokens(&tool.name)
            + self.count_tokens(&tool.description)
            + self.count_tokens(&schema)
    }

    fn count_system(&self, system: &SystemPrompt) -> usize {
        match system {
            SystemPrompt::Text(text) => self.count_tokens(text) + SYSTEM_OVERHEAD,
            SystemPrompt::Blocks(blocks) => {
                SYSTEM_OVERHEAD
                    + blocks
                        .iter()
                        .map(|block| self.count_content_block(block))
                        .sum::<usize>()
            }
        }
    }

    fn estimate_request_total(&self, request: &ChatRequest) -> usize {
        let mut total = REQUEST_OVERHEAD;
        if let Some(system) = &request.system {
            total += self.count_system(system);
        }
        for tool in &request.tools {
            total += self.count_tool(tool);
        }
        for message in &request.messages {
            total += self.count_message(message);
        }
        total
    }

    /// Panic recovery counters; zero for backends that cannot panic.
    fn panic_stats(&self) -> PanicStats {
        PanicStats::default()
    }
}

/// Minimum cacheable prefix size the provider enforces per model family.
pub fn minimum_tokens_for_model(model: &str) -> usize {
    if model.to_lowercase().contains("haiku") {
        2048
    } else {
        1024
    }
}

/// Which backend to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerMode {
    /// Byte-pair encoder; startup fails if the vocabulary cannot load
    Exact,
    /// Character heuristic only
    Heuristic,
    /// Byte-pair encoder, silently degrading to the heuristic if the
    /// vocabulary cannot load
    #[default]
    Hybrid,
}

impl TokenizerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenizerMode::Exact => "exact",
            TokenizerMode::Heuristic => "heuristic",
            TokenizerMode::Hybrid => "hybrid",
        }
    }
}

impl FromStr for TokenizerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(TokenizerMode::Exact),
            "heuristic" => Ok(TokenizerMode::Heuristic),
            "hybrid" => Ok(TokenizerMode::Hybrid),
            other => Err(format!(
                "invalid tokenizer mode '{}' (must be one of: exact, heuristic, hybrid)",
                other
            )),
        }
    }
}

/// Build the configured estimator. Only `TokenizerMode::Exact` can fail.
pub fn build_estimator(mode: TokenizerMode) -> Result<Arc<dyn TokenEstimator>, TokenizerError> {
    match mode {
        TokenizerMode::Heuristic => Ok(Arc::new(HeuristicEstimator::new())),
        TokenizerMode::Exact => Ok(Arc::new(BpeEstimator::new()?)),
        TokenizerMode::Hybrid => match BpeEstimator::new() {
            Ok(estimator) => Ok(Arc::new(estimator)),
            Err(err) => {
                warn!(error = %err, "BPE vocabulary unavailable, using heuristic estimator");
                Ok(Arc::new(HeuristicEstimator::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::request::ImageSource;

    #[test]
    fn test_minimum_tokens_by_family() {
        assert_eq!(minimum_tokens_for_model("claude-3-haiku-20240307"), 2048);
        assert_eq!(minimum_tokens_for_model("claude-3-5-haiku-20241022"), 2048);
        assert_eq!(
            minimum_tokens_for_model("claude-3-5-sonnet-20241022"),
            1024
        );
        assert_eq!(minimum_tokens_for_model("claude-opus-4-20250514"), 1024);
        assert_eq!(minimum_tokens_for_model("unknown-model"), 1024);
    }

    #[test]
    fn test_composition_rules() {
        let estimator = HeuristicEstimator::new();
        let text = "The quick brown fox jumps over the lazy dog.";

        let block = ContentBlock::text(text);
        assert_eq!(
            estimator.count_content_block(&block),
            estimator.count_tokens(text) + 2
        );

        let image = ContentBlock::Image {
            source: ImageSource {
                source_type: "base64".to_string(),
                media_type: Some("image/png".to_string()),
                data: "aGk=".to_string(),
            },
            cache_control: None,
        };
        assert_eq!(estimator.count_content_block(&image), IMAGE_BLOCK_TOKENS);

        let message = Message::user(text);
        assert_eq!(
            estimator.count_message(&message),
            3 + estimator.count_content_block(&message.content[0])
        );
    }

    #[test]
    fn test_request_total_covers_all_regions() {
        let estimator = HeuristicEstimator::new();
        let request = ChatRequest {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
            messages: vec![Message::user("Hello")],
            system: Some(SystemPrompt::text("You are helpful.")),
            tools: vec![ToolDefinition {
                name: "calculator".to_string(),
                description: "Evaluates arithmetic.".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
                cache_control: None,
            }],
            temperature: None,
            top_p: None,
            top_k: None,
            stream: None,
            stop_sequences: vec![],
        };

        let expected = 5
            + estimator.count_system(request.system.as_ref().unwrap())
            + estimator.count_tool(&request.tools[0])
            + estimator.count_message(&request.messages[0]);
        assert_eq!(estimator.estimate_request_total(&request), expected);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(
            "hybrid".parse::<TokenizerMode>().unwrap(),
            TokenizerMode::Hybrid
        );
        assert!("anthropic".parse::<TokenizerMode>().is_err());
    }
}
