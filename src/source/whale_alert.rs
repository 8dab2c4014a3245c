//! Whale Alert transfer adapter.
//!
//! Fetches recent large transactions from the Whale Alert REST API and
//! normalizes them into [`WhaleTransfer`] records. The USD floor and result
//! limit are configuration inputs.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Payload, RawItem, SourceAdapter, SourceKey, WhaleTransfer};
use crate::utils::FetchError;

const BASE_URL: &str = "https://api.whale-alert.io/v1";

pub struct WhaleAlertAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    min_value_usd: u64,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct WhaleAlertResponse {
    #[serde(default)]
    transactions: Vec<WhaleAlertTx>,
}

#[derive(Debug, Deserialize)]
struct WhaleAlertTx {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    amount: f64,
    #[serde(default)]
    amount_usd: f64,
    #[serde(default)]
    from: WhaleAlertParty,
    #[serde(default)]
    to: WhaleAlertParty,
    #[serde(default, rename = "transaction_type")]
    tx_type: String,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Default, Deserialize)]
struct WhaleAlertParty {
    #[serde(default)]
    owner: String,
}

impl WhaleAlertAdapter {
    pub fn new(api_key: String, min_value_usd: u64, limit: u32, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url: BASE_URL.to_string(), api_key, min_value_usd, limit }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SourceAdapter for WhaleAlertAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::new("whale_alert", "transactions")
    }

    async fn fetch(&self) -> Result<RawItem, FetchError> {
        let url = format!("{}/transactions", self.base_url);
        let params = [
            ("api_key", self.api_key.clone()),
            ("min_value", self.min_value_usd.to_string()),
            ("limit", self.limit.to_string()),
        ];

        let resp = self.client.get(&url).query(&params).send().await?;
        match resp.status().as_u16() {
            429 => return Err(FetchError::rate_limited("whale_alert: HTTP 429")),
            401 | 403 => {
                return Err(FetchError::network(format!(
                    "whale_alert: rejected API key (HTTP {})",
                    resp.status()
                )))
            }
            _ => {}
        }
        let resp = resp.error_for_status()?;

        let body: WhaleAlertResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::malformed(format!("whale_alert: {}", e)))?;

        let transfers: Vec<WhaleTransfer> = body
            .transactions
            .into_iter()
            .map(|tx| WhaleTransfer {
                symbol: tx.symbol,
                amount: tx.amount,
                amount_usd: tx.amount_usd,
                from_owner: if tx.from.owner.is_empty() { "unknown".into() } else { tx.from.owner },
                to_owner: if tx.to.owner.is_empty() { "unknown".into() } else { tx.to.owner },
                tx_type: tx.tx_type,
                timestamp: tx.timestamp,
            })
            .collect();

        log::debug!("whale_alert: fetched {} transfers", transfers.len());
        Ok(RawItem::new("whale_alert", Payload::WhaleTransfers { transfers }))
    }
}
