//! autocache - transparent caching gateway for the Anthropic Messages API
//!
//! Sits between client applications and the upstream API and rewrites each
//! request body to mark stable prefixes as cacheable, so repeated requests
//! with shared prefixes (long system prompts, tool schemas, documents) are
//! billed at cache-read rates instead of full input rates.
//!
//! ## Key Features
//!
//! - **Automatic breakpoints**: system prompts, tool schemas, and large
//!   content blocks are marked with `cache_control` without client changes
//! - **Strategy profiles**: conservative / moderate / aggressive presets
//!   trade breakpoint budget against minimum prefix size
//! - **Cost projections**: every response carries `X-Autocache-*` headers
//!   with token counts, break-even estimates, and projected savings
//! - **Savings analytics**: a bounded history of planning decisions is
//!   aggregated at the `/savings` endpoint

pub mod analytics;
pub mod api;
pub mod cache;
pub mod config;
pub mod pricing;
pub mod server;
pub mod tokenizer;

pub use analytics::{AnalyticsRecorder, AnalyticsSnapshot};
pub use api::{ChatRequest, ContentBlock, Message, ProxyClient, SystemPrompt, ToolDefinition};
pub use cache::{
    CacheBreakpoint, CacheControl, CacheMetadata, CachePlanner, CacheTtl, Strategy,
};
pub use config::{Config, ConfigBuilder, ConfigError};
pub use pricing::{PricingTable, RoiProjection};
pub use server::{router, AppState};
pub use tokenizer::{
    build_estimator, minimum_tokens_for_model, TokenEstimator, TokenizerMode,
};
