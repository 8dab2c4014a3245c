//! Alert fan-out to notification channels.
//!
//! The dispatcher checks the cool-down record before anything else: a
//! dedupe key that delivered recently is suppressed (logged and counted,
//! never sent). Otherwise the record is reserved up front — a concurrent
//! dispatch of the same key cannot double-deliver — and every configured
//! channel is attempted independently under the shared retry policy. The
//! reservation is rolled back only when *all* channels fail, so the next
//! occurrence gets another chance.

pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::anomaly::rules::{AlertEvent, AlertKind};
use crate::utils::{DeliveryError, RetryPolicy};

pub const METRIC_ALERTS_DELIVERED: &str = "marketsentry_alerts_delivered_total";
pub const METRIC_ALERTS_SUPPRESSED: &str = "marketsentry_alerts_suppressed_total";
pub const METRIC_ALERTS_FAILED: &str = "marketsentry_alerts_failed_total";

/// One delivery target. Message rendering richer than [`format_alert`] is a
/// collaborator outside this crate; channels receive the rendered text.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, message: &str) -> Result<(), DeliveryError>;
}

/// Fallback channel when nothing else is configured: alerts land in the log.
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        log::warn!("ALERT {}", message);
        Ok(())
    }
}

#[derive(Debug)]
pub struct ChannelDelivery {
    pub channel: String,
    pub result: Result<(), DeliveryError>,
}

#[derive(Debug)]
pub struct DispatchReport {
    pub dedupe_key: String,
    pub suppressed: bool,
    pub deliveries: Vec<ChannelDelivery>,
}

impl DispatchReport {
    pub fn delivered(&self) -> bool {
        self.deliveries.iter().any(|d| d.result.is_ok())
    }
}

pub struct Dispatcher {
    channels: Vec<Arc<dyn NotifyChannel>>,
    cooldown: chrono::Duration,
    retry: RetryPolicy,
    records: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn NotifyChannel>>, cooldown: Duration, retry: RetryPolicy) -> Self {
        let cooldown = chrono::Duration::from_std(cooldown)
            .unwrap_or_else(|_| chrono::Duration::max_value());
        Self { channels, cooldown, retry, records: Mutex::new(HashMap::new()) }
    }

    /// Deliver one event to every channel, deduplicating by cool-down.
    pub async fn dispatch(&self, event: &AlertEvent) -> DispatchReport {
        let now = Utc::now();
        {
            let mut records = self.records.lock().await;
            records.retain(|_, last| now.signed_duration_since(*last) < self.cooldown);
            if records.contains_key(&event.dedupe_key) {
                log::info!("alert {} suppressed (cool-down active)", event.dedupe_key);
                metrics::counter!(METRIC_ALERTS_SUPPRESSED, 1);
                return DispatchReport {
                    dedupe_key: event.dedupe_key.clone(),
                    suppressed: true,
                    deliveries: Vec::new(),
                };
            }
            records.insert(event.dedupe_key.clone(), now);
        }

        let message = format_alert(event);
        let deliveries = join_all(self.channels.iter().map(|channel| {
            let message = message.clone();
            async move {
                let result = self
                    .retry
                    .run(DeliveryError::is_retryable, || channel.send(&message))
                    .await;
                match &result {
                    Ok(()) => log::info!("alert {} delivered via {}", event.dedupe_key, channel.name()),
                    Err(e) => {
                        log::warn!("alert {} failed on {}: {}", event.dedupe_key, channel.name(), e)
                    }
                }
                ChannelDelivery { channel: channel.name().to_string(), result }
            }
        }))
        .await;

        let report = DispatchReport {
            dedupe_key: event.dedupe_key.clone(),
            suppressed: false,
            deliveries,
        };
        if report.delivered() {
            metrics::counter!(METRIC_ALERTS_DELIVERED, 1);
        } else {
            // Total failure: release the reservation and surface it to the
            // operator. Never fatal.
            self.records.lock().await.remove(&event.dedupe_key);
            metrics::counter!(METRIC_ALERTS_FAILED, 1);
            log::error!(
                "alert {} failed on every channel ({} attempted)",
                event.dedupe_key,
                self.channels.len()
            );
        }
        report
    }
}

/// Default plain-text rendering shared by all channels.
pub fn format_alert(event: &AlertEvent) -> String {
    let icon = match event.kind {
        AlertKind::PriceChange => "💰",
        AlertKind::WhaleAlert => "🐋",
        AlertKind::Anomaly => "🚨",
    };
    let mut msg = format!(
        "{} [{}] {} on {}: value {:.2} crossed threshold {:.2}",
        icon, event.severity, event.kind, event.metric, event.value, event.threshold
    );
    if let Some(pattern) = &event.pattern {
        msg.push_str(&format!(" (pattern: {})", pattern));
    }
    msg.push_str(&format!(" at {}", event.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
    msg
}
