//! Error handling for the monitoring pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the monitoring pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (the only fatal class, checked at startup)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Upstream fetch errors
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache backing errors
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Notification delivery errors
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

/// Result type for the monitoring pipeline
pub type Result<T> = std::result::Result<T, Error>;

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::Other(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::Other(err.to_string())
    }
}

/// What went wrong while fetching from an upstream source.
///
/// The kind also serves as the error marker written into snapshots, so it
/// serializes as a plain snake_case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Network,
    RateLimited,
    Malformed,
    Timeout,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::Malformed => "malformed",
            FetchErrorKind::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure of a single source fetch.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    /// Whether the cache layer may retry this fetch within the same cycle.
    /// Rate-limit responses are deliberately not retryable: hammering a
    /// throttled provider only extends the penalty window.
    pub retryable: bool,
    pub message: String,
}

impl FetchError {
    pub fn network(message: impl Into<String>) -> Self {
        Self { kind: FetchErrorKind::Network, retryable: true, message: message.into() }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self { kind: FetchErrorKind::RateLimited, retryable: false, message: message.into() }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self { kind: FetchErrorKind::Malformed, retryable: false, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { kind: FetchErrorKind::Timeout, retryable: true, message: message.into() }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::timeout(err.to_string())
        } else if err.status().map(|s| s.as_u16() == 429).unwrap_or(false) {
            FetchError::rate_limited(err.to_string())
        } else if err.is_decode() {
            FetchError::malformed(err.to_string())
        } else {
            FetchError::network(err.to_string())
        }
    }
}

/// Cache backing-store failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backing unavailable: {0}")]
    BackingUnavailable(String),
    #[error("cache codec error: {0}")]
    Codec(String),
}

/// Notification channel failures.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Timeouts, 5xx responses – worth retrying with backoff
    #[error("transient delivery error: {0}")]
    Transient(String),
    /// Malformed endpoint, 4xx responses – reported once, never retried
    #[error("permanent delivery error: {0}")]
    Permanent(String),
    /// Credential rejection – reported once, never retried
    #[error("delivery auth error: {0}")]
    Auth(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }
}
