//! Request analytics for the savings endpoint
//!
//! Keeps a bounded ring of the most recent planning records and derives
//! aggregate statistics from a snapshot on demand. The recorder is an
//! injected dependency, not a global: handlers share one instance, tests
//! build their own.

use crate::cache::{BreakpointCategory, CacheMetadata, Strategy};
use crate::pricing::format_cost;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

/// Thread-safe bounded history of planning metadata
#[derive(Clone)]
pub struct AnalyticsRecorder {
    history: Arc<RwLock<VecDeque<CacheMetadata>>>,
    capacity: usize,
    strategy: Strategy,
}

impl AnalyticsRecorder {
    /// A capacity of zero disables recording entirely.
    pub fn new(capacity: usize, strategy: Strategy) -> Self {
        Self {
            history: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            strategy,
        }
    }

    /// Append a record, dropping the oldest once the ring is full.
    pub fn record(&self, metadata: CacheMetadata) {
        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.write().expect("analytics lock poisoned");
        history.push_back(metadata);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.read().expect("analytics lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produce a coherent copy of the history plus aggregates computed from
    /// it. Callers never hold references into the live ring.
    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let recent_requests: Vec<CacheMetadata> = {
            let history = self.history.read().expect("analytics lock poisoned");
            history.iter().cloned().collect()
        };

        let mut requests_with_cache = 0usize;
        let mut total_tokens_processed = 0usize;
        let mut total_tokens_cached = 0usize;
        let mut savings_at_10 = 0.0f64;
        let mut savings_at_100 = 0.0f64;
        let mut counts = CategoryBreakdown::default();
        let mut token_sums = CategoryBreakdown::default();

        for metadata in &recent_requests {
            total_tokens_processed += metadata.total_tokens;
            total_tokens_cached += metadata.cached_tokens;

            if metadata.cache_injected {
                requests_with_cache += 1;
                savings_at_10 += metadata.roi.savings_at_10_requests;
                savings_at_100 += metadata.roi.savings_at_100_requests;
            }

            for bp in &metadata.breakpoints {
                match bp.category {
                    BreakpointCategory::System => {
                        counts.system += 1;
                        token_sums.system += bp.tokens;
                    }
                    BreakpointCategory::Tools => {
                        counts.tools += 1;
                        token_sums.tools += bp.tokens;
                    }
                    BreakpointCategory::Content => {
                        counts.content += 1;
                        token_sums.content += bp.tokens;
                    }
                }
            }
        }

        let average_cache_ratio =
            total_tokens_cached as f64 / total_tokens_processed.max(1) as f64;

        let average_tokens_by_type = CategoryBreakdown {
            system: mean(token_sums.system, counts.system),
            tools: mean(token_sums.tools, counts.tools),
            content: mean(token_sums.content, counts.content),
        };

        AnalyticsSnapshot {
            aggregated_stats: AggregatedStats {
                total_requests: recent_requests.len(),
                requests_with_cache,
                total_tokens_processed,
                total_tokens_cached,
                average_cache_ratio,
                total_savings_after_10_reqs: format_cost(savings_at_10),
                total_savings_after_100_reqs: format_cost(savings_at_100),
            },
            debug_info: DebugInfo {
                breakpoints_by_type: counts,
                average_tokens_by_type,
            },
            config: RecorderConfig {
                history_size: self.capacity,
                strategy: self.strategy,
            },
            recent_requests,
        }
    }
}

fn mean(sum: usize, count: usize) -> usize {
    if count == 0 {
        0
    } else {
        sum / count
    }
}

/// Point-in-time view returned by the savings endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub recent_requests: Vec<CacheMetadata>,
    pub aggregated_stats: AggregatedStats,
    pub debug_info: DebugInfo,
    pub config: RecorderConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedStats {
    pub total_requests: usize,
    pub requests_with_cache: usize,
    pub total_tokens_processed: usize,
    pub total_tokens_cached: usize,
    pub average_cache_ratio: f64,
    pub total_savings_after_10_reqs: String,
    pub total_savings_after_100_reqs: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub breakpoints_by_type: CategoryBreakdown,
    pub average_tokens_by_type: CategoryBreakdown,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CategoryBreakdown {
    pub system: usize,
    pub tools: usize,
    pub content: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecorderConfig {
    pub history_size: usize,
    pub strategy: Strategy,
}
