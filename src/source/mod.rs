//! Upstream signal sources – price APIs, whale feeds, sentiment indices.
//!
//! Every source, whatever its transport (REST call, RSS parse, scraped
//! page), normalizes its payload into [`RawItem`] at this boundary. The
//! RSS/news and social-scraper adapters live outside this crate and plug in
//! through [`SourceAdapter`]; their payload shapes are still part of
//! [`Payload`] so the snapshot export surface stays fixed.

pub mod coingecko;
pub mod sentiment;
pub mod whale_alert;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::utils::FetchError;

/// Identifies one upstream resource, e.g. `coingecko:markets`.
///
/// Used as the cache key and as the provenance tag on snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub source: String,
    pub resource: String,
}

impl SourceKey {
    pub fn new(source: &str, resource: &str) -> Self {
        Self { source: source.to_lowercase(), resource: resource.to_lowercase() }
    }

    /// Parse a rendered key (e.g. "coingecko:markets")
    pub fn parse(s: &str) -> Option<Self> {
        let (source, resource) = s.split_once(':')?;
        if source.is_empty() || resource.is_empty() {
            return None;
        }
        Some(Self::new(source, resource))
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.resource)
    }
}

/// One fetched unit of upstream data, immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    /// Provider name, e.g. "coingecko"
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub payload: Payload,
}

impl RawItem {
    pub fn new(source: &str, payload: Payload) -> Self {
        Self { source: source.to_string(), fetched_at: Utc::now(), payload }
    }
}

/// Normalized payload shapes across all source categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Spot quotes per coin id (e.g. "bitcoin")
    Prices { quotes: BTreeMap<String, PriceQuote> },
    /// Large on-chain transfers above a USD floor
    WhaleTransfers { transfers: Vec<WhaleTransfer> },
    /// News feed entries (produced by external RSS adapters)
    News { entries: Vec<NewsEntry> },
    /// Social posts (produced by the external scraping adapter)
    Posts { posts: Vec<SocialPost> },
    /// Market-wide sentiment score in [-1, 1]
    Sentiment { score: f64, classification: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price_usd: f64,
    pub change_24h_pct: f64,
    pub market_cap_usd: f64,
    pub volume_24h_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTransfer {
    pub symbol: String,
    pub amount: f64,
    pub amount_usd: f64,
    pub from_owner: String,
    pub to_owner: String,
    pub tx_type: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEntry {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialPost {
    pub author: String,
    pub text: String,
    pub engagement: f64,
    pub posted_at: String,
}

/// Trait implemented by any async source producing normalized items.
///
/// Adapters are stateless between invocations (scraper session state is
/// internal to that adapter and opaque here). Timeouts are imposed by the
/// caller wrapping `fetch` in `tokio::time::timeout`; every await point in
/// an adapter is an I/O future, so cancellation is cooperative.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Cache key / provenance tag for this adapter.
    fn key(&self) -> SourceKey;

    /// Fetch one normalized item from the upstream.
    async fn fetch(&self) -> Result<RawItem, FetchError>;
}
