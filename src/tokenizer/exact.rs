//! Byte-pair token counting with panic isolation
//!
//! Uses the cl100k_base vocabulary, which tracks Claude's tokenizer closely
//! on English and code corpora. The encoder library has crashed on exotic
//! Unicode inputs before (Spanish ordinal indicators among them), so every
//! encode call runs inside a panic boundary: a caught panic increments a
//! counter, logs a sanitized sample, and answers from the heuristic instead.
//! Counting never fails the request.

use super::heuristic::HeuristicEstimator;
use super::{PanicStats, TokenEstimator, TokenizerError};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tiktoken_rs::CoreBPE;
use tracing::error;

/// Longest payload sample included in panic logs
const PANIC_SAMPLE_RUNES: usize = 200;
const MAX_CACHE_ENTRIES: usize = 4096;

pub struct BpeEstimator {
    bpe: CoreBPE,
    fallback: HeuristicEstimator,
    cache: RwLock<HashMap<String, usize>>,
    panic_count: AtomicU64,
    fallback_count: AtomicU64,
}

impl BpeEstimator {
    pub fn new() -> Result<Self, TokenizerError> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|err| TokenizerError::VocabularyLoad(err.to_string()))?;
        Ok(Self {
            bpe,
            fallback: HeuristicEstimator::new(),
            cache: RwLock::new(HashMap::new()),
            panic_count: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
        })
    }

    fn encode_count(&self, text: &str) -> usize {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.bpe.encode_ordinary(text).len()
        }));

        match attempt {
            Ok(count) => count,
            Err(payload) => {
                self.panic_count.fetch_add(1, Ordering::Relaxed);
                self.fallback_count.fetch_add(1, Ordering::Relaxed);

                let message = panic_message(payload.as_ref());
                error!(
                    panic = %message,
                    text_sample = %sanitize_for_log(text, PANIC_SAMPLE_RUNES),
                    text_runes = text.chars().count(),
                    total_panics = self.panic_count.load(Ordering::Relaxed),
                    "Encoder panicked, answering from heuristic"
                );

                self.fallback.count_tokens(text)
            }
        }
    }
}

impl TokenEstimator for BpeEstimator {
    fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        {
            let cache = self.cache.read().expect("token cache lock poisoned");
            if let Some(&count) = cache.get(text) {
                return count;
            }
        }

        let count = self.encode_count(text);

        {
            let mut cache = self.cache.write().expect("token cache lock poisoned");
            if cache.len() < MAX_CACHE_ENTRIES {
                cache.insert(text.to_string(), count);
            }
        }

        count
    }

    fn panic_stats(&self) -> PanicStats {
        PanicStats {
            panics: self.panic_count.load(Ordering::Relaxed),
            fallbacks: self.fallback_count.load(Ordering::Relaxed),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Truncate to `limit` runes and strip control characters so a hostile
/// payload cannot corrupt the log stream.
fn sanitize_for_log(text: &str, limit: usize) -> String {
    let mut sample: String = text
        .chars()
        .take(limit)
        .map(|c| {
            if c == '\n' || c == '\r' || c == '\t' {
                ' '
            } else {
                c
            }
        })
        .filter(|c| !c.is_control())
        .collect();
    if text.chars().count() > limit {
        sample.push_str(" (truncated)");
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_ascii_text() {
        let estimator = BpeEstimator::new().unwrap();
        let count = estimator.count_tokens("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_empty_counts_zero() {
        let estimator = BpeEstimator::new().unwrap();
        assert_eq!(estimator.count_tokens(""), 0);
    }

    #[test]
    fn test_repeated_count_is_stable() {
        let estimator = BpeEstimator::new().unwrap();
        let text = "You are a helpful assistant. ".repeat(100);
        assert_eq!(estimator.count_tokens(&text), estimator.count_tokens(&text));
    }

    #[test]
    fn test_exotic_unicode_counts_without_aborting() {
        let estimator = BpeEstimator::new().unwrap();
        for text in ["1º 2º 3º", "ªº", "你好世界", "🌍", "e\u{0301}\u{0302}\u{0303}"] {
            assert!(estimator.count_tokens(text) >= 1, "failed on {:?}", text);
        }
    }

    #[test]
    fn test_panic_stats_start_at_zero() {
        let estimator = BpeEstimator::new().unwrap();
        let stats = estimator.panic_stats();
        assert_eq!(stats.panics, 0);
        assert_eq!(stats.fallbacks, 0);
    }

    #[test]
    fn test_sanitize_for_log_strips_controls() {
        let sanitized = sanitize_for_log("line1\nline2\u{0007}end", 200);
        assert!(!sanitized.contains('\n'));
        assert!(!sanitized.contains('\u{0007}'));
        assert!(sanitized.contains("line1"));
    }

    #[test]
    fn test_sanitize_for_log_truncates() {
        let long = "a".repeat(500);
        let sanitized = sanitize_for_log(&long, 200);
        assert!(sanitized.ends_with("(truncated)"));
        assert!(sanitized.chars().count() < 250);
    }

    #[test]
    fn test_tracks_heuristic_within_tolerance_on_prose() {
        let exact = BpeEstimator::new().unwrap();
        // ~5 tokens by the vendor's own counting
        let text = "You are a helpful assistant.";
        let count = exact.count_tokens(text);
        assert!((3..=10).contains(&count), "got {}", count);
    }
}
