//! Configuration management for the monitoring pipeline.
//!
//! All tunables the core consumes — per-source TTLs, anomaly thresholds,
//! cool-down, channel endpoints — live here and are supplied externally via
//! TOML and environment variables. `validate` runs at startup and is the
//! only place a configuration problem is fatal.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::anomaly::AnomalyConfig;
use crate::utils::{Error, Result, RetryPolicy};

/// Main configuration structure for the monitoring pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General application settings
    pub app: AppConfig,
    /// Cycle scheduling settings
    pub scheduler: SchedulerConfig,
    /// Upstream source settings
    pub sources: SourcesConfig,
    /// Cache layer settings
    pub cache: CacheConfig,
    /// Anomaly detection thresholds
    pub anomaly: AnomalyConfig,
    /// Notification settings
    pub notify: NotifyConfig,
}

/// Application-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,
    /// Path to the data directory
    pub data_dir: String,
    /// Write the latest snapshot as JSON into the data directory
    pub export_snapshots: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), data_dir: "./data".to_string(), export_snapshots: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between aggregation cycles
    pub tick_secs: u64,
    /// Upper bound on one cycle's collection phase
    pub cycle_deadline_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_secs: 60, cycle_deadline_secs: 45 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// Per-fetch timeout applied to every source
    pub timeout_secs: u64,
    pub coingecko: CoinGeckoSourceConfig,
    pub whale_alert: WhaleAlertSourceConfig,
    pub sentiment: SentimentSourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            coingecko: CoinGeckoSourceConfig::default(),
            whale_alert: WhaleAlertSourceConfig::default(),
            sentiment: SentimentSourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoinGeckoSourceConfig {
    pub enabled: bool,
    /// CoinGecko coin ids to track
    pub coin_ids: Vec<String>,
    /// Pro API key; falls back to COINGECKO_API_KEY
    pub api_key: Option<String>,
    /// Freshness window for price quotes
    pub ttl_secs: u64,
}

impl Default for CoinGeckoSourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            coin_ids: ["bitcoin", "ethereum", "solana", "cardano", "polkadot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            api_key: None,
            ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhaleAlertSourceConfig {
    pub enabled: bool,
    /// API key; falls back to WHALE_ALERT_API_KEY
    pub api_key: Option<String>,
    /// Minimum transfer size requested from the API
    pub min_value_usd: u64,
    /// Transfers fetched per cycle
    pub limit: u32,
    pub ttl_secs: u64,
}

impl Default for WhaleAlertSourceConfig {
    fn default() -> Self {
        Self { enabled: false, api_key: None, min_value_usd: 500_000, limit: 10, ttl_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentSourceConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for SentimentSourceConfig {
    fn default() -> Self {
        Self { enabled: true, ttl_secs: 1800 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Required when backend = "redis"
    pub redis_url: Option<String>,
    pub retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            retry: RetryConfig { max_attempts: 3, base_delay_ms: 500 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Minimum seconds between two alerts sharing a dedupe key
    pub cooldown_secs: u64,
    pub discord_webhook: Option<String>,
    pub slack_webhook: Option<String>,
    pub retry: RetryConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 300,
            discord_webhook: None,
            slack_webhook: None,
            retry: RetryConfig { max_attempts: 3, base_delay_ms: 1000 },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 500 }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

fn env_fallback(value: &Option<String>, env_key: &str) -> Option<String> {
    value
        .clone()
        .or_else(|| std::env::var(env_key).ok())
        .filter(|s| !s.is_empty())
}

impl SourcesConfig {
    pub fn coingecko_api_key(&self) -> Option<String> {
        env_fallback(&self.coingecko.api_key, "COINGECKO_API_KEY")
    }

    pub fn whale_alert_api_key(&self) -> Option<String> {
        env_fallback(&self.whale_alert.api_key, "WHALE_ALERT_API_KEY")
    }

    pub fn any_enabled(&self) -> bool {
        self.coingecko.enabled || self.whale_alert.enabled || self.sentiment.enabled
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Other(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration as a TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap()
    }

    /// Startup validation; any error here is fatal by design.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_secs == 0 {
            return Err(Error::ConfigError("scheduler.tick_secs must be > 0".into()));
        }
        if self.scheduler.cycle_deadline_secs == 0 {
            return Err(Error::ConfigError("scheduler.cycle_deadline_secs must be > 0".into()));
        }
        if self.sources.timeout_secs == 0 {
            return Err(Error::ConfigError("sources.timeout_secs must be > 0".into()));
        }
        if !self.sources.any_enabled() {
            return Err(Error::ConfigError("no sources enabled".into()));
        }
        if self.sources.coingecko.enabled && self.sources.coingecko.coin_ids.is_empty() {
            return Err(Error::ConfigError("sources.coingecko.coin_ids is empty".into()));
        }
        if self.sources.whale_alert.enabled && self.whale_alert_key_missing() {
            return Err(Error::ConfigError(
                "sources.whale_alert.api_key (or WHALE_ALERT_API_KEY) is required".into(),
            ));
        }
        if self.cache.backend == CacheBackend::Redis && self.cache.redis_url.is_none() {
            return Err(Error::ConfigError("cache.redis_url is required for the redis backend".into()));
        }

        if self.anomaly.price_change_pct <= 0.0
            || self.anomaly.whale_threshold_usd <= 0.0
            || self.anomaly.zscore_threshold <= 0.0
        {
            return Err(Error::ConfigError("anomaly thresholds must be positive".into()));
        }
        if self.anomaly.min_samples < 3 {
            return Err(Error::ConfigError("anomaly.min_samples must be at least 3".into()));
        }
        if self.anomaly.window_max_samples < self.anomaly.min_samples {
            return Err(Error::ConfigError(
                "anomaly.window_max_samples must cover anomaly.min_samples".into(),
            ));
        }
        if self.anomaly.price_reference_offset == 0 {
            return Err(Error::ConfigError("anomaly.price_reference_offset must be > 0".into()));
        }

        if self.notify.cooldown_secs == 0 {
            return Err(Error::ConfigError("notify.cooldown_secs must be > 0".into()));
        }
        for (name, webhook) in [
            ("notify.discord_webhook", &self.notify.discord_webhook),
            ("notify.slack_webhook", &self.notify.slack_webhook),
        ] {
            if let Some(raw) = webhook {
                let parsed = url::Url::parse(raw)
                    .map_err(|e| Error::ConfigError(format!("{}: {}", name, e)))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(Error::ConfigError(format!("{}: must be http(s)", name)));
                }
            }
        }
        Ok(())
    }

    fn whale_alert_key_missing(&self) -> bool {
        self.sources.whale_alert_api_key().is_none()
    }
}
