//! Cache breakpoint planning for the Anthropic prompt cache
//!
//! This module decides where to place `cache_control` markers in an outbound
//! request so that stable prefixes (system prompts, tool schemas, large
//! documents) are served from the provider's prompt cache on repeat requests.
//!
//! ## Planning principles
//!
//! 1. **Structural order**: candidates are collected system -> tools -> messages
//!    and selected in that order, never by ROI ranking. This keeps placement
//!    deterministic and retry-safe.
//! 2. **Minimum size**: a candidate must meet the model's minimum cacheable
//!    token count (scaled by the strategy's multiplier).
//! 3. **Breakpoint budget**: the provider accepts at most four markers per
//!    request; strategies spend fewer.

mod planner;

pub use planner::CachePlanner;

use crate::pricing::RoiProjection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard provider limit on cache breakpoints per request
pub const MAX_CACHE_BREAKPOINTS: usize = 4;

/// Cache entry time-to-live class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTtl {
    /// Short-lived cache for dynamic content
    #[serde(rename = "5m")]
    FiveMinutes,
    /// Long-lived cache for stable content (system prompts, tool schemas)
    #[serde(rename = "1h")]
    OneHour,
}

impl CacheTtl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTtl::FiveMinutes => "5m",
            CacheTtl::OneHour => "1h",
        }
    }
}

impl fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache control directive attached to a content block or tool definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub control_type: CacheControlType,
    pub ttl: CacheTtl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControlType {
    /// The only kind the provider currently supports
    Ephemeral,
}

impl CacheControl {
    pub fn ephemeral(ttl: CacheTtl) -> Self {
        Self {
            control_type: CacheControlType::Ephemeral,
            ttl,
        }
    }
}

/// Named planning strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Fewer breakpoints, stricter size requirements
    Conservative,
    #[default]
    Moderate,
    /// Full breakpoint budget, lenient size requirements
    Aggressive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Conservative => "conservative",
            Strategy::Moderate => "moderate",
            Strategy::Aggressive => "aggressive",
        }
    }

    /// Resolve the strategy to its parameter bundle.
    pub fn config(&self) -> StrategyConfig {
        match self {
            Strategy::Conservative => StrategyConfig {
                max_breakpoints: 2,
                min_tokens_multiplier: 2.0,
                system_ttl: CacheTtl::OneHour,
                tools_ttl: CacheTtl::OneHour,
                content_ttl: CacheTtl::FiveMinutes,
            },
            Strategy::Moderate => StrategyConfig {
                max_breakpoints: 3,
                min_tokens_multiplier: 1.0,
                system_ttl: CacheTtl::OneHour,
                tools_ttl: CacheTtl::OneHour,
                content_ttl: CacheTtl::FiveMinutes,
            },
            Strategy::Aggressive => StrategyConfig {
                max_breakpoints: 4,
                min_tokens_multiplier: 0.8,
                system_ttl: CacheTtl::OneHour,
                tools_ttl: CacheTtl::OneHour,
                content_ttl: CacheTtl::FiveMinutes,
            },
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(Strategy::Conservative),
            "moderate" => Ok(Strategy::Moderate),
            "aggressive" => Ok(Strategy::Aggressive),
            other => Err(format!(
                "invalid strategy '{}' (must be one of: conservative, moderate, aggressive)",
                other
            )),
        }
    }
}

/// Parameter bundle a strategy resolves to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub max_breakpoints: usize,
    /// Multiplier applied to the model's base minimum token count
    pub min_tokens_multiplier: f64,
    pub system_ttl: CacheTtl,
    pub tools_ttl: CacheTtl,
    pub content_ttl: CacheTtl,
}

/// Structural region a breakpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointCategory {
    System,
    Tools,
    Content,
}

impl BreakpointCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointCategory::System => "system",
            BreakpointCategory::Tools => "tools",
            BreakpointCategory::Content => "content",
        }
    }
}

/// One applied cache marker plus the bookkeeping describing what was cached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheBreakpoint {
    /// Structural location: "system", "tools", "message_0_block_1", ...
    pub position: String,
    /// Tokens attributed to the cached prefix region
    pub tokens: usize,
    pub ttl: CacheTtl,
    #[serde(rename = "type")]
    pub category: BreakpointCategory,
    /// Cost to write this cache entry
    pub write_price: f64,
    /// Savings per subsequent cache read
    pub read_savings: f64,
    /// Requests until the write cost is recovered (-1 if never)
    pub break_even: i64,
    pub timestamp: DateTime<Utc>,
}

/// Per-request record of the planner's decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cache_injected: bool,
    pub total_tokens: usize,
    pub cached_tokens: usize,
    /// cached / total; may exceed 1.0 when the prefix estimate for a region
    /// exceeds the whole-request estimate, surfaced as-is
    pub cache_ratio: f64,
    pub breakpoints: Vec<CacheBreakpoint>,
    pub roi: RoiProjection,
    pub strategy: Strategy,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheMetadata {
    /// Compact `position:tokens:ttl` comma-separated form for response headers.
    pub fn breakpoints_header(&self) -> String {
        self.breakpoints
            .iter()
            .map(|bp| format!("{}:{}:{}", bp.position, bp.tokens, bp.ttl))
            .collect::<Vec<_>>()
            .join(",")
    }
}
