//! Configuration management for Chanpost

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub token_file: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl TelegramConfig {
    /// Read and trim the bot token from the configured file.
    pub fn read_token(&self) -> Result<String> {
        let path = shellexpand::tilde(&self.token_file).to_string();
        let token = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::Invalid(format!("failed to read token file {}: {}", path, e))
        })?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::Invalid(format!("token file {} is empty", path)).into());
        }
        Ok(token)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Telegram channel identifier, e.g. "@news" or "-1001234567890".
    pub id: String,
    /// Posting cadence as a humantime string, e.g. "15m" or "1h".
    pub cadence: String,
    /// Per-channel override of the window quota.
    #[serde(default)]
    pub max_per_window: Option<u32>,
}

impl ChannelConfig {
    pub fn cadence_secs(&self) -> Result<i64> {
        parse_duration_secs(&self.cadence, "channel cadence")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Accepted sends per channel per window.
    pub max_per_window: u32,
    /// Window length as a humantime string, e.g. "1h".
    pub window: String,
    /// Optional ceiling across all channels per window.
    #[serde(default)]
    pub global_max_per_window: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 20,
            window: "1h".to_string(),
            global_max_per_window: None,
        }
    }
}

impl RateLimitConfig {
    pub fn window_secs(&self) -> Result<i64> {
        parse_duration_secs(&self.window, "rate limit window")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(ConfigError::MissingField("channels".to_string()).into());
        }
        for channel in &self.channels {
            if channel.id.is_empty() {
                return Err(ConfigError::Invalid("channel id cannot be empty".to_string()).into());
            }
            if channel.cadence_secs()? == 0 {
                return Err(ConfigError::Invalid(format!(
                    "channel {} cadence must be non-zero",
                    channel.id
                ))
                .into());
            }
        }
        if self.rate_limits.max_per_window == 0 {
            return Err(
                ConfigError::Invalid("rate_limits.max_per_window must be non-zero".to_string())
                    .into(),
            );
        }
        if self.rate_limits.window_secs()? == 0 {
            return Err(
                ConfigError::Invalid("rate_limits.window must be non-zero".to_string()).into(),
            );
        }
        if self.retry.max_attempts == 0 {
            return Err(
                ConfigError::Invalid("retry.max_attempts must be at least 1".to_string()).into(),
            );
        }
        Ok(())
    }
}

fn parse_duration_secs(input: &str, what: &str) -> Result<i64> {
    let duration: Duration = humantime::parse_duration(input)
        .map_err(|e| ConfigError::Invalid(format!("could not parse {} {:?}: {}", what, input, e)))?;
    Ok(duration.as_secs() as i64)
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHANPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("chanpost").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("chanpost"))
}
