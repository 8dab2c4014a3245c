//! CoinGecko spot-price adapter.
//!
//! Polls the public `/simple/price` endpoint for a configured list of coin
//! ids and normalizes each quote to USD price, 24h change, market cap and
//! 24h volume. A pro API key is attached when configured.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use super::{Payload, PriceQuote, RawItem, SourceAdapter, SourceKey};
use crate::utils::FetchError;

const BASE_URL: &str = "https://api.coingecko.com/api/v3";

pub struct CoinGeckoAdapter {
    client: reqwest::Client,
    base_url: String,
    coin_ids: Vec<String>,
    api_key: Option<String>,
}

/// Raw per-coin quote as returned by /simple/price.
#[derive(Debug, Deserialize)]
struct GeckoQuote {
    usd: f64,
    #[serde(default)]
    usd_market_cap: Option<f64>,
    #[serde(default)]
    usd_24h_vol: Option<f64>,
    #[serde(default)]
    usd_24h_change: Option<f64>,
}

impl CoinGeckoAdapter {
    pub fn new(coin_ids: Vec<String>, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url: BASE_URL.to_string(), coin_ids, api_key }
    }

    /// Point the adapter at a different base URL (tests, proxies).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SourceAdapter for CoinGeckoAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::new("coingecko", "markets")
    }

    async fn fetch(&self) -> Result<RawItem, FetchError> {
        let url = format!("{}/simple/price", self.base_url);
        let mut params = vec![
            ("ids".to_string(), self.coin_ids.join(",")),
            ("vs_currencies".to_string(), "usd".to_string()),
            ("include_24hr_change".to_string(), "true".to_string()),
            ("include_market_cap".to_string(), "true".to_string()),
            ("include_24hr_vol".to_string(), "true".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("x_cg_pro_api_key".to_string(), key.clone()));
        }

        let resp = self.client.get(&url).query(&params).send().await?;
        if resp.status().as_u16() == 429 {
            return Err(FetchError::rate_limited("coingecko: HTTP 429"));
        }
        let resp = resp.error_for_status()?;

        let raw: HashMap<String, GeckoQuote> = resp
            .json()
            .await
            .map_err(|e| FetchError::malformed(format!("coingecko: {}", e)))?;

        let quotes: BTreeMap<String, PriceQuote> = raw
            .into_iter()
            .map(|(coin, q)| {
                (
                    coin,
                    PriceQuote {
                        price_usd: q.usd,
                        change_24h_pct: q.usd_24h_change.unwrap_or(0.0),
                        market_cap_usd: q.usd_market_cap.unwrap_or(0.0),
                        volume_24h_usd: q.usd_24h_vol.unwrap_or(0.0),
                    },
                )
            })
            .collect();

        log::debug!("coingecko: fetched {} quotes", quotes.len());
        Ok(RawItem::new("coingecko", Payload::Prices { quotes }))
    }
}
