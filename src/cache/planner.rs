//! Cache breakpoint placement
//!
//! The planner walks a parsed request in structural order (system -> tools ->
//! message blocks), collects every region large enough to cache, caps the
//! list at the strategy's breakpoint budget, and attaches `cache_control`
//! markers in place. Selection is by collection order: ROI scores are
//! computed for diagnostics but never reorder the candidates, so the same
//! request always produces the same markers.

use super::{
    BreakpointCategory, CacheBreakpoint, CacheControl, CacheMetadata, CacheTtl, Strategy,
    StrategyConfig,
};
use crate::api::request::{ChatRequest, ContentBlock, SystemPrompt};
use crate::pricing::{BreakpointRoi, PricingTable};
use crate::tokenizer::{minimum_tokens_for_model, TokenEstimator};
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

/// Phrase markers that suggest a content block is a stable instruction
/// prefix worth the longer TTL.
const STABLE_CONTENT_MARKERS: &[&str] = &[
    "You are",
    "Your role",
    "Instructions:",
    "Guidelines:",
    "System:",
    "Context:",
    "Background:",
    "Reference:",
];

/// Content blocks longer than this (in runes) qualify for the TTL upgrade.
const STABLE_CONTENT_MIN_RUNES: usize = 1000;

/// Structural location a candidate addresses. Marks always land on the last
/// element of the addressed sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    System,
    Tools,
    MessageBlock { message: usize, block: usize },
}

/// A structurally eligible location for a cache marker
#[derive(Debug, Clone)]
struct Candidate {
    position: String,
    tokens: usize,
    category: BreakpointCategory,
    ttl: CacheTtl,
    roi: BreakpointRoi,
    roi_score: f64,
    target: Target,
}

/// Plans and applies cache markers for one request at a time.
///
/// Holds no per-request state, so a single planner is shared across all
/// worker tasks.
pub struct CachePlanner {
    estimator: Arc<dyn TokenEstimator>,
    pricing: Arc<PricingTable>,
    strategy: Strategy,
    /// Operator cap on top of the strategy's breakpoint budget
    max_breakpoints: usize,
    /// Operator multiplier on top of the strategy's threshold multiplier
    token_multiplier: f64,
}

impl CachePlanner {
    pub fn new(
        estimator: Arc<dyn TokenEstimator>,
        pricing: Arc<PricingTable>,
        strategy: Strategy,
    ) -> Self {
        Self {
            estimator,
            pricing,
            strategy,
            max_breakpoints: super::MAX_CACHE_BREAKPOINTS,
            token_multiplier: 1.0,
        }
    }

    /// Tighten the planner beyond what the strategy asks for.
    pub fn with_limits(mut self, max_breakpoints: usize, token_multiplier: f64) -> Self {
        self.max_breakpoints = max_breakpoints.min(super::MAX_CACHE_BREAKPOINTS);
        self.token_multiplier = token_multiplier;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn estimator(&self) -> &Arc<dyn TokenEstimator> {
        &self.estimator
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    /// Analyze the request, attach cache markers in place, and describe what
    /// was done. Never fails: a request with no eligible region comes back
    /// untouched with `cache_injected = false`.
    pub fn plan(&self, request: &mut ChatRequest) -> CacheMetadata {
        let config = self.strategy.config();
        let threshold = (minimum_tokens_for_model(&request.model) as f64
            * config.min_tokens_multiplier
            * self.token_multiplier) as usize;

        let mut candidates = self.collect_candidates(request, threshold, &config);

        // Cap to the strategy budget by collection order, never by score
        candidates.truncate(config.max_breakpoints.min(self.max_breakpoints));

        let breakpoints = self.apply_marks(request, &candidates);

        let total_tokens = self.estimator.estimate_request_total(request);
        let cached_tokens: usize = breakpoints.iter().map(|bp| bp.tokens).sum();
        let cache_ratio = cached_tokens as f64 / total_tokens.max(1) as f64;
        let roi = self
            .pricing
            .request_roi(&request.model, total_tokens, cached_tokens, &breakpoints);

        debug!(
            model = %request.model,
            strategy = %self.strategy,
            total_tokens,
            cached_tokens,
            breakpoints = breakpoints.len(),
            "Cache planning completed"
        );

        CacheMetadata {
            cache_injected: !breakpoints.is_empty(),
            total_tokens,
            cached_tokens,
            cache_ratio,
            breakpoints,
            roi,
            strategy: self.strategy,
            model: request.model.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Walk the request in structural order and collect every region whose
    /// token count clears the threshold. The order here is normative; it is
    /// the selection order and the emission order.
    fn collect_candidates(
        &self,
        request: &ChatRequest,
        threshold: usize,
        config: &StrategyConfig,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if let Some(system) = &request.system {
            let tokens = self.estimator.count_system(system);
            if tokens >= threshold {
                let position = match system {
                    SystemPrompt::Text(_) => "system",
                    SystemPrompt::Blocks(_) => "system_blocks",
                };
                candidates.push(self.candidate(
                    &request.model,
                    position.to_string(),
                    tokens,
                    BreakpointCategory::System,
                    config.system_ttl,
                    Target::System,
                ));
            }
        }

        if !request.tools.is_empty() {
            let tokens: usize = request
                .tools
                .iter()
                .map(|tool| self.estimator.count_tool(tool))
                .sum();
            if tokens >= threshold {
                candidates.push(self.candidate(
                    &request.model,
                    "tools".to_string(),
                    tokens,
                    BreakpointCategory::Tools,
                    config.tools_ttl,
                    Target::Tools,
                ));
            }
        }

        for (message_index, message) in request.messages.iter().enumerate() {
            for (block_index, block) in message.content.iter().enumerate() {
                let ContentBlock::Text { text, .. } = block else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }
                let tokens = self.estimator.count_tokens(text);
                if tokens >= threshold {
                    candidates.push(self.candidate(
                        &request.model,
                        format!("message_{}_block_{}", message_index, block_index),
                        tokens,
                        BreakpointCategory::Content,
                        content_ttl(text, config),
                        Target::MessageBlock {
                            message: message_index,
                            block: block_index,
                        },
                    ));
                }
            }
        }

        candidates
    }

    fn candidate(
        &self,
        model: &str,
        position: String,
        tokens: usize,
        category: BreakpointCategory,
        ttl: CacheTtl,
        target: Target,
    ) -> Candidate {
        let roi = self.pricing.breakpoint_roi(model, tokens, ttl);
        let roi_score = roi_score(tokens, &roi, category);
        Candidate {
            position,
            tokens,
            category,
            ttl,
            roi,
            roi_score,
            target,
        }
    }

    /// Attach an ephemeral marker for each selected candidate and emit the
    /// breakpoint records in the same order.
    fn apply_marks(&self, request: &mut ChatRequest, candidates: &[Candidate]) -> Vec<CacheBreakpoint> {
        let mut breakpoints = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let control = CacheControl::ephemeral(candidate.ttl);
            if !apply_to_target(request, candidate.target, control) {
                continue;
            }

            debug!(
                position = %candidate.position,
                tokens = candidate.tokens,
                ttl = %candidate.ttl,
                roi_score = candidate.roi_score,
                break_even = candidate.roi.break_even_reads,
                "Applied cache control"
            );

            breakpoints.push(CacheBreakpoint {
                position: candidate.position.clone(),
                tokens: candidate.tokens,
                ttl: candidate.ttl,
                category: candidate.category,
                write_price: candidate.roi.write_cost,
                read_savings: candidate.roi.savings_per_read,
                break_even: candidate.roi.break_even_reads,
                timestamp: Utc::now(),
            });
        }

        breakpoints
    }
}

/// Put the marker on the last element of the addressed sequence. A string
/// system prompt has no block to decorate, so it is converted to the
/// single-block array form first.
fn apply_to_target(request: &mut ChatRequest, target: Target, control: CacheControl) -> bool {
    match target {
        Target::System => match request.system.take() {
            Some(SystemPrompt::Text(text)) => {
                let mut block = ContentBlock::text(text);
                block.set_cache_control(control);
                request.system = Some(SystemPrompt::Blocks(vec![block]));
                true
            }
            Some(SystemPrompt::Blocks(mut blocks)) => {
                let applied = match blocks.last_mut() {
                    Some(last) => {
                        last.set_cache_control(control);
                        true
                    }
                    None => false,
                };
                request.system = Some(SystemPrompt::Blocks(blocks));
                applied
            }
            None => false,
        },
        Target::Tools => match request.tools.last_mut() {
            Some(tool) => {
                tool.cache_control = Some(control);
                true
            }
            None => false,
        },
        Target::MessageBlock { message, block } => {
            match request
                .messages
                .get_mut(message)
                .and_then(|m| m.content.get_mut(block))
            {
                Some(block) => {
                    block.set_cache_control(control);
                    true
                }
                None => false,
            }
        }
    }
}

/// Choose a TTL for a message content block. Long blocks carrying stable
/// instruction markers get the 1h tier; everything else uses the strategy
/// default.
fn content_ttl(text: &str, config: &StrategyConfig) -> CacheTtl {
    if text.chars().count() > STABLE_CONTENT_MIN_RUNES {
        let lowered = text.to_lowercase();
        for marker in STABLE_CONTENT_MARKERS {
            if lowered.contains(&marker.to_lowercase()) {
                return CacheTtl::OneHour;
            }
        }
    }
    config.content_ttl
}

/// Diagnostic ranking score. Reported for debugging and analytics; selection
/// itself is strictly by structural order.
fn roi_score(tokens: usize, roi: &BreakpointRoi, category: BreakpointCategory) -> f64 {
    let mut score = roi.savings_per_read * 100.0;

    // Larger regions are more likely to be reused
    if tokens > 2048 {
        score *= 1.2;
    }
    if tokens > 5000 {
        score *= 1.3;
    }

    match category {
        BreakpointCategory::System => score *= 2.0,
        BreakpointCategory::Tools => score *= 1.5,
        BreakpointCategory::Content => {
            if roi.break_even_reads <= 2 {
                score *= 1.3;
            } else if roi.break_even_reads <= 5 {
                score *= 1.1;
            }
        }
    }

    // Penalize slow break-evens, strictest tier only
    if roi.break_even_reads > 20 {
        score *= 0.2;
    } else if roi.break_even_reads > 10 {
        score *= 0.5;
    }

    score
}
