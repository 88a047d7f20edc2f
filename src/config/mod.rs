//! Configuration management for the gateway
//!
//! Supports configuration via:
//! 1. Config file (~/.config/autocache/config.toml)
//! 2. Environment variables (ANTHROPIC_API_KEY, AUTOCACHE_STRATEGY, etc.)
//! 3. CLI arguments (override file/env settings)

use crate::cache::{Strategy, MAX_CACHE_BREAKPOINTS};
use crate::tokenizer::TokenizerMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings
    pub server: ServerSettings,

    /// Upstream API settings
    pub upstream: UpstreamSettings,

    /// Planner settings
    pub cache: CacheSettings,

    /// Token estimator settings
    pub tokenizer: TokenizerSettings,

    /// Savings history settings
    pub analytics: AnalyticsSettings,

    /// Logging settings
    pub log: LogSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            cache: CacheSettings::default(),
            tokenizer: TokenizerSettings::default(),
            analytics: AnalyticsSettings::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// Base URL of the Anthropic API
    pub base_url: String,

    /// Fallback API key when the inbound request carries none
    /// (can also use ANTHROPIC_API_KEY env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Planning strategy
    pub strategy: Strategy,

    /// Upper bound on breakpoints per request (1..=4)
    pub max_breakpoints: usize,

    /// Extra multiplier applied on top of the strategy's minimum-token
    /// multiplier
    pub token_multiplier: f64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Moderate,
            max_breakpoints: MAX_CACHE_BREAKPOINTS,
            token_multiplier: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerSettings {
    /// Backend selection: exact, heuristic, or hybrid
    pub mode: TokenizerMode,

    /// Log encoder panics and fallbacks
    pub log_failures: bool,
}

impl Default for TokenizerSettings {
    fn default() -> Self {
        Self {
            mode: TokenizerMode::Hybrid,
            log_failures: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Number of recent requests kept for the savings endpoint (0 disables)
    pub history_size: usize,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("autocache")
            .join("config.toml")
    }

    /// Load config from default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::default_path())
    }

    /// Load config from specific path, then apply environment overrides
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid PORT: {}", port)))?;
        }
        if let Ok(url) = std::env::var("ANTHROPIC_API_URL") {
            self.upstream.base_url = url;
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.upstream.api_key = Some(key);
        }
        if let Ok(strategy) = std::env::var("AUTOCACHE_STRATEGY") {
            self.cache.strategy = strategy.parse().map_err(ConfigError::Invalid)?;
        }
        if let Ok(mode) = std::env::var("AUTOCACHE_TOKENIZER_MODE") {
            self.tokenizer.mode = mode.parse().map_err(ConfigError::Invalid)?;
        }
        if let Ok(size) = std::env::var("AUTOCACHE_HISTORY_SIZE") {
            self.analytics.history_size = size
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("invalid history size: {}", size)))?;
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(json) = std::env::var("LOG_JSON") {
            self.log.json = matches!(json.to_lowercase().as_str(), "true" | "1" | "yes" | "on");
        }
        Ok(self)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::Invalid("host cannot be empty".to_string()));
        }
        if self.upstream.base_url.is_empty() {
            return Err(ConfigError::Invalid(
                "upstream base URL cannot be empty".to_string(),
            ));
        }
        if self.cache.max_breakpoints < 1 || self.cache.max_breakpoints > MAX_CACHE_BREAKPOINTS {
            return Err(ConfigError::Invalid(format!(
                "max breakpoints must be between 1 and {}, got {}",
                MAX_CACHE_BREAKPOINTS, self.cache.max_breakpoints
            )));
        }
        if self.cache.token_multiplier <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "token multiplier must be positive, got {}",
                self.cache.token_multiplier
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level: {}",
                self.log.level
            )));
        }

        Ok(())
    }

    /// Full listener address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn is_api_key_configured(&self) -> bool {
        self.upstream
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Builder for creating Config programmatically (used heavily in tests)
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn upstream_url(mut self, url: impl Into<String>) -> Self {
        self.config.upstream.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.upstream.api_key = Some(key.into());
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.cache.strategy = strategy;
        self
    }

    pub fn tokenizer_mode(mut self, mode: TokenizerMode) -> Self {
        self.config.tokenizer.mode = mode;
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.analytics.history_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.strategy, Strategy::Moderate);
        assert_eq!(config.analytics.history_size, 100);
        assert_eq!(config.server_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .port(9090)
            .strategy(Strategy::Aggressive)
            .history_size(50)
            .api_key("test-key")
            .build();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.cache.strategy, Strategy::Aggressive);
        assert_eq!(config.analytics.history_size, 50);
        assert!(config.is_api_key_configured());
    }

    #[test]
    fn test_validation_rejects_bad_breakpoints() {
        let mut config = Config::default();
        config.cache.max_breakpoints = 0;
        assert!(config.validate().is_err());
        config.cache.max_breakpoints = 5;
        assert!(config.validate().is_err());
        config.cache.max_breakpoints = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_multiplier() {
        let mut config = Config::default();
        config.cache.token_multiplier = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let mut config = Config::default();
        config.log.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ConfigBuilder::new()
            .strategy(Strategy::Conservative)
            .tokenizer_mode(crate::tokenizer::TokenizerMode::Heuristic)
            .build();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.cache.strategy, Strategy::Conservative);
        assert_eq!(
            parsed.tokenizer.mode,
            crate::tokenizer::TokenizerMode::Heuristic
        );
    }
}
