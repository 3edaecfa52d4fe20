//! Configuration management.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default API base URL (can be overridden at compile time via HEALTHDASH_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("HEALTHDASH_API_URL") {
    Some(url) => url,
    None => "http://localhost:3000/api",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the log level at runtime.
const ENV_LOG_LEVEL: &str = "HEALTHDASH_LOG_LEVEL";
/// Environment variable overriding the API base URL at runtime.
const ENV_API_URL: &str = "HEALTHDASH_API_URL";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the Healthdash API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Realtime channel tuning.
    #[serde(default)]
    pub realtime: RealtimeSettings,
}

/// Realtime channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Delay before the first reconnect attempt, in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for any single reconnect delay, in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Consecutive failures tolerated before live updates are given up.
    pub max_reconnect_attempts: u32,
    /// Timeout for one-shot control requests, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            request_timeout_secs: 30,
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            realtime: RealtimeSettings::default(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.api_url()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup (the process environment in production).
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(log_level) = lookup(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(api_url) = lookup(ENV_API_URL) {
            self.api_url = api_url;
        }
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.api_url)?;
        if url.cannot_be_a_base() {
            return Err(CoreError::Config(format!(
                "api_url must be a base URL: {}",
                self.api_url
            )));
        }
        Ok(url)
    }
}
