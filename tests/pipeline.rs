//! End-to-end pipeline test over fake adapters: a whale transfer above the
//! USD floor must travel collect → observe → evaluate → dispatch exactly
//! once, with the repeat suppressed by the cool-down, while a failing
//! source degrades the snapshot without breaking the cycle.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use marketsentry::aggregator::{Aggregator, SourceSpec};
use marketsentry::anomaly::{AnomalyConfig, AnomalyDetector};
use marketsentry::cache::store::MemoryStore;
use marketsentry::cache::SignalCache;
use marketsentry::engine::MonitorEngine;
use marketsentry::notify::{Dispatcher, NotifyChannel};
use marketsentry::source::{Payload, RawItem, SourceAdapter, SourceKey, WhaleTransfer};
use marketsentry::utils::{DeliveryError, FetchError, RetryPolicy};

struct WhaleFeed;

#[async_trait]
impl SourceAdapter for WhaleFeed {
    fn key(&self) -> SourceKey {
        SourceKey::new("whale_alert", "transactions")
    }

    async fn fetch(&self) -> Result<RawItem, FetchError> {
        Ok(RawItem::new(
            "whale_alert",
            Payload::WhaleTransfers {
                transfers: vec![WhaleTransfer {
                    symbol: "btc".into(),
                    amount: 40.0,
                    amount_usd: 2_000_000.0,
                    from_owner: "unknown".into(),
                    to_owner: "binance".into(),
                    tx_type: "transfer".into(),
                    timestamp: 0,
                }],
            },
        ))
    }
}

struct DeadFeed;

#[async_trait]
impl SourceAdapter for DeadFeed {
    fn key(&self) -> SourceKey {
        SourceKey::new("rss", "coindesk")
    }

    async fn fetch(&self) -> Result<RawItem, FetchError> {
        Err(FetchError::timeout("upstream gave up"))
    }
}

struct RecordingChannel {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &str) -> Result<(), DeliveryError> {
        self.sent.lock().await.push(message.to_string());
        Ok(())
    }
}

fn build_engine(
    channel: Arc<RecordingChannel>,
    export_path: Option<std::path::PathBuf>,
) -> MonitorEngine {
    let cache = Arc::new(SignalCache::new(
        Arc::new(MemoryStore::new()),
        RetryPolicy::new(1, Duration::ZERO),
    ));
    let sources = vec![
        // TTL zero: every cycle refetches, so the repeat trigger is real
        SourceSpec::new(Arc::new(WhaleFeed), Duration::ZERO, Duration::from_millis(200)),
        SourceSpec::new(Arc::new(DeadFeed), Duration::ZERO, Duration::from_millis(200)),
    ];
    let aggregator = Aggregator::new(cache, sources, Duration::from_secs(1));
    let detector = AnomalyDetector::new(AnomalyConfig::default());
    let dispatcher = Dispatcher::new(
        vec![channel as Arc<dyn NotifyChannel>],
        Duration::from_secs(300),
        RetryPolicy::new(1, Duration::ZERO),
    );
    MonitorEngine::new(aggregator, detector, dispatcher, Duration::from_secs(60), export_path)
}

#[tokio::test]
async fn whale_alert_flows_through_and_repeat_is_suppressed() {
    let channel = Arc::new(RecordingChannel { sent: Mutex::new(Vec::new()) });
    let engine = build_engine(Arc::clone(&channel), None);

    let first = engine.run_cycle().await;
    assert!(first.partial, "the dead feed must degrade the snapshot");
    assert_eq!(first.sources_total, 2);
    assert_eq!(first.sources_degraded, 1);
    assert_eq!(first.events, 1);
    assert_eq!(first.delivered, 1);
    assert_eq!(first.suppressed, 0);

    let messages = channel.sent.lock().await.clone();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("whale_alert"));
    assert!(messages[0].contains("whale.btc"));

    // Same condition fires again next cycle; the cool-down suppresses it.
    let second = engine.run_cycle().await;
    assert_eq!(second.events, 1);
    assert_eq!(second.delivered, 0);
    assert_eq!(second.suppressed, 1);
    assert_eq!(channel.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn snapshot_export_includes_error_markers() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("last_snapshot.json");
    let channel = Arc::new(RecordingChannel { sent: Mutex::new(Vec::new()) });
    let engine = build_engine(channel, Some(export.clone()));

    engine.run_cycle().await;

    let raw = std::fs::read_to_string(&export).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["partial"], true);
    assert_eq!(json["sources"]["rss:coindesk"]["status"], "error");
    assert_eq!(json["sources"]["whale_alert:transactions"]["status"], "ok");
}

#[tokio::test]
async fn cache_stats_reflect_cycle_activity() {
    let channel = Arc::new(RecordingChannel { sent: Mutex::new(Vec::new()) });
    let engine = build_engine(channel, None);

    engine.run_cycle().await;
    let stats = engine.cache_stats();
    // Both sources missed (nothing cached yet); the dead feed never stores.
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 0);
}
