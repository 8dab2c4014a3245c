//! Market sentiment adapter backed by the Fear & Greed index.
//!
//! The raw index is 0..100; it is normalized here to [-1, 1] so the anomaly
//! detector sees the same scale whichever sentiment provider is plugged in.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::{Payload, RawItem, SourceAdapter, SourceKey};
use crate::utils::FetchError;

const BASE_URL: &str = "https://api.alternative.me";

pub struct SentimentAdapter {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FngResponse {
    data: Vec<FngEntry>,
}

#[derive(Debug, Deserialize)]
struct FngEntry {
    value: String,
    value_classification: String,
}

impl SentimentAdapter {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url: BASE_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn normalize(index: f64) -> f64 {
        ((index - 50.0) / 50.0).clamp(-1.0, 1.0)
    }
}

#[async_trait]
impl SourceAdapter for SentimentAdapter {
    fn key(&self) -> SourceKey {
        SourceKey::new("feargreed", "index")
    }

    async fn fetch(&self) -> Result<RawItem, FetchError> {
        let url = format!("{}/fng/", self.base_url);
        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() == 429 {
            return Err(FetchError::rate_limited("feargreed: HTTP 429"));
        }
        let resp = resp.error_for_status()?;

        let body: FngResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::malformed(format!("feargreed: {}", e)))?;

        let entry = body
            .data
            .first()
            .ok_or_else(|| FetchError::malformed("feargreed: empty data array"))?;
        let index: f64 = entry
            .value
            .parse()
            .map_err(|_| FetchError::malformed(format!("feargreed: bad value {:?}", entry.value)))?;

        Ok(RawItem::new(
            "feargreed",
            Payload::Sentiment {
                score: Self::normalize(index),
                classification: entry.value_classification.clone(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_maps_index_range() {
        assert_eq!(SentimentAdapter::normalize(50.0), 0.0);
        assert_eq!(SentimentAdapter::normalize(100.0), 1.0);
        assert_eq!(SentimentAdapter::normalize(0.0), -1.0);
        // out-of-contract values clamp instead of overshooting
        assert_eq!(SentimentAdapter::normalize(150.0), 1.0);
    }

    #[test]
    fn fng_payload_parses() {
        let json = r#"{"name":"Fear and Greed Index",
            "data":[{"value":"26","value_classification":"Fear","timestamp":"1700000000"}]}"#;
        let body: FngResponse = serde_json::from_str(json).unwrap();
        assert_eq!(body.data[0].value, "26");
        assert_eq!(body.data[0].value_classification, "Fear");
    }
}
