//! Pipeline wiring and the serial cycle runner.
//!
//! One cycle: collect a snapshot across all sources, export it for the
//! dashboard collaborators, feed freshly fetched observations into the
//! anomaly detector, evaluate the touched metrics and dispatch qualified
//! events. Cycles run strictly one after another — the loop awaits the
//! whole cycle before sleeping — so upstream load stays bounded.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::aggregator::{Aggregator, Snapshot, SourceOutcome, SourceSpec};
use crate::anomaly::rules::MetricKind;
use crate::anomaly::AnomalyDetector;
use crate::cache::store::{CacheStore, MemoryStore, RedisStore};
use crate::cache::SignalCache;
use crate::config::{CacheBackend, Config};
use crate::notify::webhook::{DiscordWebhookChannel, SlackWebhookChannel};
use crate::notify::{Dispatcher, LogChannel, NotifyChannel};
use crate::source::coingecko::CoinGeckoAdapter;
use crate::source::sentiment::SentimentAdapter;
use crate::source::whale_alert::WhaleAlertAdapter;
use crate::source::Payload;
use crate::utils::Result;

/// Summary of one completed cycle, for logging and the run-once mode.
#[derive(Debug)]
pub struct CycleReport {
    pub partial: bool,
    pub sources_total: usize,
    pub sources_degraded: usize,
    pub events: usize,
    pub delivered: usize,
    pub suppressed: usize,
}

pub struct MonitorEngine {
    aggregator: Aggregator,
    detector: Mutex<AnomalyDetector>,
    dispatcher: Dispatcher,
    tick: Duration,
    export_path: Option<PathBuf>,
}

struct Observation {
    metric: String,
    kind: MetricKind,
    timestamp: DateTime<Utc>,
    value: f64,
}

/// Map one snapshot to numeric observations. Only freshly fetched results
/// count: re-observing a cached or stale value would duplicate samples and
/// skew the rolling statistics. News/post payloads carry no numeric series.
fn observations_from(snapshot: &Snapshot) -> Vec<Observation> {
    let mut observations = Vec::new();
    for outcome in snapshot.sources.values() {
        let SourceOutcome::Ok { item, from_cache, .. } = outcome else {
            continue;
        };
        if *from_cache {
            continue;
        }
        match &item.payload {
            Payload::Prices { quotes } => {
                for (coin, quote) in quotes {
                    observations.push(Observation {
                        metric: format!("{}.price_usd", coin),
                        kind: MetricKind::Price,
                        timestamp: item.fetched_at,
                        value: quote.price_usd,
                    });
                    if quote.volume_24h_usd > 0.0 {
                        observations.push(Observation {
                            metric: format!("{}.volume_24h_usd", coin),
                            kind: MetricKind::Volume,
                            timestamp: item.fetched_at,
                            value: quote.volume_24h_usd,
                        });
                    }
                }
            }
            Payload::WhaleTransfers { transfers } => {
                for transfer in transfers {
                    let symbol =
                        if transfer.symbol.is_empty() { "unknown" } else { transfer.symbol.as_str() };
                    observations.push(Observation {
                        metric: format!("whale.{}", symbol.to_lowercase()),
                        kind: MetricKind::Whale,
                        timestamp: DateTime::from_timestamp(transfer.timestamp, 0)
                            .unwrap_or(item.fetched_at),
                        value: transfer.amount_usd,
                    });
                }
            }
            Payload::Sentiment { score, .. } => observations.push(Observation {
                metric: "market.sentiment".to_string(),
                kind: MetricKind::Sentiment,
                timestamp: item.fetched_at,
                value: *score,
            }),
            Payload::News { .. } | Payload::Posts { .. } => {}
        }
    }
    observations
}

impl MonitorEngine {
    pub fn new(
        aggregator: Aggregator,
        detector: AnomalyDetector,
        dispatcher: Dispatcher,
        tick: Duration,
        export_path: Option<PathBuf>,
    ) -> Self {
        Self { aggregator, detector: Mutex::new(detector), dispatcher, tick, export_path }
    }

    /// Build the full pipeline from configuration. Fails only on
    /// configuration errors.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
            CacheBackend::Redis => {
                // validate() guarantees the URL is present
                let url = config.cache.redis_url.as_deref().unwrap_or_default();
                Arc::new(RedisStore::open(url)?)
            }
        };
        let cache = Arc::new(SignalCache::new(store, config.cache.retry.to_policy()));

        let timeout = Duration::from_secs(config.sources.timeout_secs);
        let mut sources = Vec::new();
        if config.sources.coingecko.enabled {
            let adapter = CoinGeckoAdapter::new(
                config.sources.coingecko.coin_ids.clone(),
                config.sources.coingecko_api_key(),
                timeout,
            );
            sources.push(SourceSpec::new(
                Arc::new(adapter),
                Duration::from_secs(config.sources.coingecko.ttl_secs),
                timeout,
            ));
        }
        if config.sources.whale_alert.enabled {
            let adapter = WhaleAlertAdapter::new(
                config.sources.whale_alert_api_key().unwrap_or_default(),
                config.sources.whale_alert.min_value_usd,
                config.sources.whale_alert.limit,
                timeout,
            );
            sources.push(SourceSpec::new(
                Arc::new(adapter),
                Duration::from_secs(config.sources.whale_alert.ttl_secs),
                timeout,
            ));
        }
        if config.sources.sentiment.enabled {
            let adapter = SentimentAdapter::new(timeout);
            sources.push(SourceSpec::new(
                Arc::new(adapter),
                Duration::from_secs(config.sources.sentiment.ttl_secs),
                timeout,
            ));
        }
        log::info!("monitoring {} sources", sources.len());

        let aggregator = Aggregator::new(
            cache,
            sources,
            Duration::from_secs(config.scheduler.cycle_deadline_secs),
        );
        let detector = AnomalyDetector::new(config.anomaly.clone());

        let mut channels: Vec<Arc<dyn NotifyChannel>> = Vec::new();
        if let Some(hook) = &config.notify.discord_webhook {
            channels.push(Arc::new(DiscordWebhookChannel::new(hook, timeout)?));
        }
        if let Some(hook) = &config.notify.slack_webhook {
            channels.push(Arc::new(SlackWebhookChannel::new(hook, timeout)?));
        }
        if channels.is_empty() {
            log::info!("no notification channels configured, alerts go to the log");
            channels.push(Arc::new(LogChannel));
        }
        let dispatcher = Dispatcher::new(
            channels,
            Duration::from_secs(config.notify.cooldown_secs),
            config.notify.retry.to_policy(),
        );

        let export_path = config
            .app
            .export_snapshots
            .then(|| PathBuf::from(&config.app.data_dir).join("last_snapshot.json"));

        Ok(Self::new(
            aggregator,
            detector,
            dispatcher,
            Duration::from_secs(config.scheduler.tick_secs),
            export_path,
        ))
    }

    /// Execute one aggregation → detection → notification cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let snapshot = self.aggregator.collect().await;
        if let Some(path) = &self.export_path {
            if let Err(e) = export_snapshot(&snapshot, path) {
                log::warn!("snapshot export failed: {}", e);
            }
        }

        let observations = observations_from(&snapshot);
        let events = {
            let mut detector = self.detector.lock().await;
            let mut seen = HashSet::new();
            let mut events = Vec::new();
            for obs in &observations {
                detector.observe(&obs.metric, obs.kind, obs.timestamp, obs.value);
                for event in detector.evaluate(&obs.metric) {
                    // A batch can trigger the same condition repeatedly;
                    // one event per dedupe key per cycle is enough.
                    if seen.insert(event.dedupe_key.clone()) {
                        events.push(event);
                    }
                }
            }
            events
        };

        let mut delivered = 0;
        let mut suppressed = 0;
        for event in &events {
            let report = self.dispatcher.dispatch(event).await;
            if report.suppressed {
                suppressed += 1;
            } else if report.delivered() {
                delivered += 1;
            }
        }

        CycleReport {
            partial: snapshot.partial,
            sources_total: snapshot.sources.len(),
            sources_degraded: snapshot.sources.values().filter(|o| o.is_degraded()).count(),
            events: events.len(),
            delivered,
            suppressed,
        }
    }

    /// Serial cycle loop: a new cycle never starts while the previous one is
    /// still collecting.
    pub async fn run(&self) {
        log::info!("engine started, tick {:?}", self.tick);
        loop {
            let started = std::time::Instant::now();
            let report = self.run_cycle().await;
            log::info!(
                "cycle done in {:?}: {}/{} sources ok, {} events ({} delivered, {} suppressed)",
                started.elapsed(),
                report.sources_total - report.sources_degraded,
                report.sources_total,
                report.events,
                report.delivered,
                report.suppressed
            );
            let elapsed = started.elapsed();
            if elapsed < self.tick {
                tokio::time::sleep(self.tick - elapsed).await;
            }
        }
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.aggregator.cache().stats()
    }
}

fn export_snapshot(snapshot: &Snapshot, path: &PathBuf) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    Ok(())
}
