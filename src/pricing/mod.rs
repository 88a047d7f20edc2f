//! Model pricing and cache ROI projections
//!
//! Prices are USD per million tokens. Cache columns are derived from the
//! input price by construction (write-5m = 1.25x, write-1h = 2x, read = 0.1x)
//! so the table cannot drift out of the provider's published ratios.

use crate::cache::{CacheBreakpoint, CacheTtl};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::warn;

/// Model the table falls back to when a lookup misses
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Per-model unit prices (USD per 1M tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub model: String,
    pub input: f64,
    pub output: f64,
    pub cache_write_5m: f64,
    pub cache_write_1h: f64,
    pub cache_read: f64,
}

impl ModelPricing {
    /// Build a row from base prices; cache columns follow the provider's
    /// fixed ratios.
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.to_string(),
            input,
            output,
            cache_write_5m: input * 1.25,
            cache_write_1h: input * 2.0,
            cache_read: input * 0.1,
        }
    }
}

/// Per-breakpoint cost projection
#[derive(Debug, Clone, Copy)]
pub struct BreakpointRoi {
    pub write_cost: f64,
    pub savings_per_read: f64,
    /// Requests until the extra write cost is recovered; -1 if never
    pub break_even_reads: i64,
}

/// Forward-looking cost model for a planned request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoiProjection {
    /// Input cost of the request with no caching at all
    pub base_input_cost: f64,
    pub cache_write_cost: f64,
    pub cache_read_cost: f64,
    /// Total input cost of the first request (cache writes included)
    pub first_request_cost: f64,
    /// Savings on each request after the first
    pub subsequent_savings: f64,
    pub break_even_requests: i64,
    pub savings_at_10_requests: f64,
    pub savings_at_100_requests: f64,
    pub percent_savings: f64,
}

/// Immutable lookup table over the supported model families
pub struct PricingTable {
    // Ordered so fuzzy matching is deterministic
    models: Vec<ModelPricing>,
    warned_models: Mutex<HashSet<String>>,
}

impl PricingTable {
    pub fn new() -> Self {
        let models = vec![
            ModelPricing::new("claude-sonnet-4-5-20250929", 3.00, 15.00),
            ModelPricing::new("claude-sonnet-4-20250514", 3.00, 15.00),
            ModelPricing::new("claude-3-7-sonnet-20250219", 3.00, 15.00),
            ModelPricing::new("claude-3-5-sonnet-20241022", 3.00, 15.00),
            ModelPricing::new("claude-3-5-sonnet-20240620", 3.00, 15.00),
            ModelPricing::new("claude-opus-4-1-20250805", 15.00, 75.00),
            ModelPricing::new("claude-opus-4-20250514", 15.00, 75.00),
            ModelPricing::new("claude-3-opus-20240229", 15.00, 75.00),
            ModelPricing::new("claude-3-sonnet-20240229", 3.00, 15.00),
            ModelPricing::new("claude-3-5-haiku-20241022", 0.80, 4.00),
            ModelPricing::new("claude-3-haiku-20240307", 0.25, 1.25),
        ];
        Self {
            models,
            warned_models: Mutex::new(HashSet::new()),
        }
    }

    /// Find pricing for a model identifier. Falls back to the default entry
    /// on a miss; the boolean is false in that case so callers can treat the
    /// result as approximate.
    pub fn lookup(&self, model: &str) -> (&ModelPricing, bool) {
        if let Some(pricing) = self.models.iter().find(|p| p.model == model) {
            return (pricing, true);
        }

        // Fuzzy match: the first two dash-separated fragments of a table
        // entry both appearing in the query ("claude" + family marker)
        for pricing in &self.models {
            let mut fragments = pricing.model.split('-');
            if let (Some(first), Some(second)) = (fragments.next(), fragments.next()) {
                if model.contains(first) && model.contains(second) {
                    return (pricing, true);
                }
            }
        }

        self.warn_unknown(model);
        let fallback = self
            .models
            .iter()
            .find(|p| p.model == DEFAULT_MODEL)
            .expect("default model is in the table");
        (fallback, false)
    }

    fn warn_unknown(&self, model: &str) {
        let mut warned = self.warned_models.lock().expect("warn set lock poisoned");
        if warned.insert(model.to_string()) {
            warn!(model, default = DEFAULT_MODEL, "unknown model, using default pricing");
        }
    }

    /// Input + output cost without any caching.
    pub fn base_cost(&self, model: &str, input_tokens: usize, output_tokens: usize) -> f64 {
        let (pricing, _) = self.lookup(model);
        (input_tokens as f64 / 1_000_000.0) * pricing.input
            + (output_tokens as f64 / 1_000_000.0) * pricing.output
    }

    /// Cost of writing `tokens` to the cache under the given TTL.
    pub fn write_cost(&self, model: &str, tokens: usize, ttl: CacheTtl) -> f64 {
        let (pricing, _) = self.lookup(model);
        let unit = match ttl {
            CacheTtl::FiveMinutes => pricing.cache_write_5m,
            CacheTtl::OneHour => pricing.cache_write_1h,
        };
        (tokens as f64 / 1_000_000.0) * unit
    }

    /// Cost of reading `tokens` back from the cache.
    pub fn read_cost(&self, model: &str, tokens: usize) -> f64 {
        let (pricing, _) = self.lookup(model);
        (tokens as f64 / 1_000_000.0) * pricing.cache_read
    }

    /// Project costs for a single candidate breakpoint.
    pub fn breakpoint_roi(&self, model: &str, tokens: usize, ttl: CacheTtl) -> BreakpointRoi {
        let base_cost = self.base_cost(model, tokens, 0);
        let write_cost = self.write_cost(model, tokens, ttl);
        let read_cost = self.read_cost(model, tokens);

        let savings_per_read = base_cost - read_cost;
        let break_even_reads = if savings_per_read > 0.0 {
            // One request pays the write, then reads recover the premium
            let extra_cost = write_cost - base_cost;
            1 + (extra_cost / savings_per_read).ceil() as i64
        } else {
            -1
        };

        BreakpointRoi {
            write_cost,
            savings_per_read,
            break_even_reads,
        }
    }

    /// Project costs for the whole request across repeat invocations.
    pub fn request_roi(
        &self,
        model: &str,
        total_tokens: usize,
        cached_tokens: usize,
        breakpoints: &[CacheBreakpoint],
    ) -> RoiProjection {
        let base_cost = self.base_cost(model, total_tokens, 0);

        let cache_write_cost: f64 = breakpoints
            .iter()
            .map(|bp| self.write_cost(model, bp.tokens, bp.ttl))
            .sum();
        let cache_read_cost = self.read_cost(model, cached_tokens);

        let non_cached_tokens = total_tokens.saturating_sub(cached_tokens);
        let non_cached_cost = self.base_cost(model, non_cached_tokens, 0);

        let first_request_cost = cache_write_cost + non_cached_cost;
        let subsequent_request_cost = cache_read_cost + non_cached_cost;
        let subsequent_savings = base_cost - subsequent_request_cost;

        let break_even_requests = if subsequent_savings > 0.0 {
            let extra_cost = first_request_cost - base_cost;
            (extra_cost / subsequent_savings) as i64 + 1
        } else {
            -1
        };

        let percent_savings = if base_cost > 0.0 {
            (subsequent_savings / base_cost) * 100.0
        } else {
            0.0
        };

        RoiProjection {
            base_input_cost: base_cost,
            cache_write_cost,
            cache_read_cost,
            first_request_cost,
            subsequent_savings,
            break_even_requests,
            savings_at_10_requests: savings_at_n(base_cost, first_request_cost, subsequent_request_cost, 10),
            savings_at_100_requests: savings_at_n(base_cost, first_request_cost, subsequent_request_cost, 100),
            percent_savings,
        }
    }

    pub fn supported_models(&self) -> Vec<&str> {
        self.models.iter().map(|p| p.model.as_str()).collect()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Total savings after `n` requests: n uncached requests versus one first
/// request plus (n - 1) cache-read requests.
fn savings_at_n(base_cost: f64, first_request_cost: f64, subsequent_request_cost: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let without_caching = base_cost * n as f64;
    let with_caching = first_request_cost + subsequent_request_cost * (n - 1) as f64;
    without_caching - with_caching
}

/// Format a dollar amount with precision scaled to its magnitude.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.001 {
        format!("${:.6}", cost)
    } else if cost < 0.01 {
        format!("${:.4}", cost)
    } else if cost < 1.0 {
        format!("${:.3}", cost)
    } else {
        format!("${:.2}", cost)
    }
}

/// Format a token count for display (1.2K, 3.4M).
pub fn format_tokens(tokens: usize) -> String {
    if tokens < 1_000 {
        format!("{}", tokens)
    } else if tokens < 1_000_000 {
        format!("{:.1}K", tokens as f64 / 1_000.0)
    } else {
        format!("{:.1}M", tokens as f64 / 1_000_000.0)
    }
}
