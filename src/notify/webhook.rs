//! Webhook notification channels.
//!
//! Two payload styles are supported: Discord (`{"content": ...}`) and Slack
//! (`{"text": ...}`). Endpoint URLs are validated at construction so a
//! malformed webhook is a startup configuration error, not a runtime
//! delivery surprise.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use super::NotifyChannel;
use crate::utils::{DeliveryError, Error, Result};

fn validated_url(url: &str, channel: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::ConfigError(format!("{} webhook url: {}", channel, e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::ConfigError(format!(
            "{} webhook url must be http(s), got {}",
            channel,
            parsed.scheme()
        )));
    }
    Ok(parsed.to_string())
}

fn classify_status(status: reqwest::StatusCode, channel: &str) -> DeliveryError {
    let code = status.as_u16();
    match code {
        401 | 403 => DeliveryError::Auth(format!("{}: HTTP {}", channel, code)),
        429 => DeliveryError::Transient(format!("{}: HTTP 429", channel)),
        500..=599 => DeliveryError::Transient(format!("{}: HTTP {}", channel, code)),
        _ => DeliveryError::Permanent(format!("{}: HTTP {}", channel, code)),
    }
}

fn classify_transport(err: reqwest::Error, channel: &str) -> DeliveryError {
    if err.is_timeout() || err.is_connect() {
        DeliveryError::Transient(format!("{}: {}", channel, err))
    } else if err.is_builder() || err.is_request() {
        DeliveryError::Permanent(format!("{}: {}", channel, err))
    } else {
        DeliveryError::Transient(format!("{}: {}", channel, err))
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
    channel: &str,
) -> std::result::Result<(), DeliveryError> {
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .map_err(|e| classify_transport(e, channel))?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(classify_status(resp.status(), channel))
    }
}

/// Discord incoming-webhook channel.
#[derive(Debug)]
pub struct DiscordWebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl DiscordWebhookChannel {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = validated_url(url, "discord")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Ok(Self { url, client })
    }
}

#[async_trait]
impl NotifyChannel for DiscordWebhookChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn send(&self, message: &str) -> std::result::Result<(), DeliveryError> {
        post_json(&self.client, &self.url, json!({ "content": message }), "discord").await
    }
}

/// Slack incoming-webhook channel.
#[derive(Debug)]
pub struct SlackWebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl SlackWebhookChannel {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = validated_url(url, "slack")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Ok(Self { url, client })
    }
}

#[async_trait]
impl NotifyChannel for SlackWebhookChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, message: &str) -> std::result::Result<(), DeliveryError> {
        post_json(&self.client, &self.url, json!({ "text": message }), "slack").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_webhook_url_is_a_config_error() {
        let err = DiscordWebhookChannel::new("not a url", Duration::from_secs(5)).unwrap_err();
        assert!(err.to_string().contains("Configuration error"));

        let err = SlackWebhookChannel::new("ftp://hooks.slack.com/x", Duration::from_secs(5))
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn valid_webhook_urls_construct() {
        assert!(DiscordWebhookChannel::new(
            "https://discord.com/api/webhooks/1/abc",
            Duration::from_secs(5)
        )
        .is_ok());
        assert!(SlackWebhookChannel::new(
            "https://hooks.slack.com/services/T0/B0/xyz",
            Duration::from_secs(5)
        )
        .is_ok());
    }

    #[test]
    fn status_classification_matches_delivery_taxonomy() {
        use assert_matches::assert_matches;
        use reqwest::StatusCode;
        assert_matches!(classify_status(StatusCode::UNAUTHORIZED, "discord"), DeliveryError::Auth(_));
        assert_matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "discord"),
            DeliveryError::Transient(_)
        );
        assert_matches!(classify_status(StatusCode::BAD_GATEWAY, "slack"), DeliveryError::Transient(_));
        assert_matches!(classify_status(StatusCode::NOT_FOUND, "slack"), DeliveryError::Permanent(_));
    }
}
