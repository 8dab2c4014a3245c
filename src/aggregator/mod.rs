//! Concurrent fan-out across all configured sources.
//!
//! One aggregation cycle issues a bounded `get_or_fetch` per source in
//! parallel, waits for every task to settle (bounded-wait barrier, not
//! best-of-first) and assembles the results into a [`Snapshot`]. A failed
//! or timed-out source contributes an error marker and flips the `partial`
//! flag; it never aborts the other fetches or the cycle.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::SignalCache;
use crate::source::{RawItem, SourceAdapter, SourceKey};
use crate::utils::Error;

/// One source wired into the aggregation cycle, with its freshness policy.
pub struct SourceSpec {
    pub key: SourceKey,
    pub ttl: Duration,
    pub timeout: Duration,
    pub adapter: Arc<dyn SourceAdapter>,
}

impl SourceSpec {
    pub fn new(adapter: Arc<dyn SourceAdapter>, ttl: Duration, timeout: Duration) -> Self {
        Self { key: adapter.key(), ttl, timeout, adapter }
    }
}

/// Result of one source within a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceOutcome {
    Ok { item: RawItem, from_cache: bool, stale: bool },
    Error { kind: String, message: String },
}

impl SourceOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, SourceOutcome::Error { .. })
    }

    /// True when this source did not contribute fresh data this cycle:
    /// either an error marker or a stale fallback value.
    pub fn is_degraded(&self) -> bool {
        match self {
            SourceOutcome::Error { .. } => true,
            SourceOutcome::Ok { stale, .. } => *stale,
        }
    }
}

/// The merged, timestamped result of one aggregation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub partial: bool,
    pub sources: BTreeMap<String, SourceOutcome>,
}

pub struct Aggregator {
    cache: Arc<SignalCache>,
    sources: Vec<SourceSpec>,
    cycle_deadline: Duration,
}

fn error_kind(err: &Error) -> String {
    match err {
        Error::Fetch(f) => f.kind.as_str().to_string(),
        Error::Cache(_) => "cache".to_string(),
        _ => "other".to_string(),
    }
}

impl Aggregator {
    pub fn new(cache: Arc<SignalCache>, sources: Vec<SourceSpec>, cycle_deadline: Duration) -> Self {
        Self { cache, sources, cycle_deadline }
    }

    pub fn cache(&self) -> &Arc<SignalCache> {
        &self.cache
    }

    /// Collect one snapshot across all sources.
    pub async fn collect(&self) -> Snapshot {
        let started = Utc::now();
        let tasks = self.sources.iter().map(|spec| {
            let cache = Arc::clone(&self.cache);
            let key = spec.key.clone();
            let ttl = spec.ttl;
            let per_timeout = spec.timeout.min(self.cycle_deadline);
            let adapter = Arc::clone(&spec.adapter);
            async move {
                let fetch = {
                    let adapter = Arc::clone(&adapter);
                    move || {
                        let adapter = Arc::clone(&adapter);
                        async move { adapter.fetch().await }
                    }
                };
                let outcome =
                    match tokio::time::timeout(per_timeout, cache.get_or_fetch(&key, ttl, fetch))
                        .await
                    {
                        Ok(Ok(value)) => SourceOutcome::Ok {
                            item: value.item,
                            from_cache: value.from_cache,
                            stale: value.stale,
                        },
                        Ok(Err(err)) => {
                            log::warn!("source {} failed: {}", key, err);
                            SourceOutcome::Error { kind: error_kind(&err), message: err.to_string() }
                        }
                        Err(_) => {
                            log::warn!("source {} exceeded its {:?} budget", key, per_timeout);
                            // The fetch was cancelled, but last-known data is
                            // still eligible for degraded use.
                            match cache.peek(&key).await {
                                Some(stale) => SourceOutcome::Ok {
                                    item: stale.item,
                                    from_cache: true,
                                    stale: true,
                                },
                                None => SourceOutcome::Error {
                                    kind: "timeout".to_string(),
                                    message: format!("timed out after {:?}", per_timeout),
                                },
                            }
                        }
                    };
                (key.to_string(), outcome)
            }
        });

        let settled = join_all(tasks).await;

        let mut sources = BTreeMap::new();
        let mut partial = false;
        for (key, outcome) in settled {
            partial |= outcome.is_degraded();
            sources.insert(key, outcome);
        }
        if partial {
            log::info!(
                "cycle snapshot is partial ({}/{} sources degraded)",
                sources.values().filter(|o| o.is_degraded()).count(),
                sources.len()
            );
        }
        Snapshot { timestamp: started, partial, sources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::source::Payload;
    use crate::utils::{FetchError, RetryPolicy};
    use async_trait::async_trait;

    enum Behavior {
        Score(f64),
        Fail,
        Hang,
    }

    struct FakeAdapter {
        key: SourceKey,
        behavior: Behavior,
    }

    #[async_trait]
    impl SourceAdapter for FakeAdapter {
        fn key(&self) -> SourceKey {
            self.key.clone()
        }

        async fn fetch(&self) -> Result<RawItem, FetchError> {
            match self.behavior {
                Behavior::Score(score) => Ok(RawItem::new(
                    &self.key.source,
                    Payload::Sentiment { score, classification: "Neutral".into() },
                )),
                Behavior::Fail => Err(FetchError::network("connection refused")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    unreachable!("fetch should have been cancelled")
                }
            }
        }
    }

    fn spec(name: &str, behavior: Behavior) -> SourceSpec {
        SourceSpec::new(
            Arc::new(FakeAdapter { key: SourceKey::new(name, "feed"), behavior }),
            Duration::from_secs(60),
            Duration::from_millis(100),
        )
    }

    fn cache() -> Arc<SignalCache> {
        Arc::new(SignalCache::new(
            Arc::new(MemoryStore::new()),
            RetryPolicy::new(1, Duration::ZERO),
        ))
    }

    #[tokio::test]
    async fn all_sources_ok_is_not_partial() {
        let agg = Aggregator::new(
            cache(),
            vec![spec("a", Behavior::Score(0.1)), spec("b", Behavior::Score(0.2))],
            Duration::from_secs(1),
        );
        let snap = agg.collect().await;
        assert!(!snap.partial);
        assert_eq!(snap.sources.len(), 2);
        assert!(snap.sources.values().all(|o| !o.is_error()));
    }

    #[tokio::test]
    async fn one_failure_marks_partial_without_aborting_others() {
        let agg = Aggregator::new(
            cache(),
            vec![
                spec("a", Behavior::Score(0.1)),
                spec("b", Behavior::Fail),
                spec("c", Behavior::Score(0.3)),
                spec("d", Behavior::Score(0.4)),
                spec("e", Behavior::Score(0.5)),
            ],
            Duration::from_secs(1),
        );
        let snap = agg.collect().await;
        assert!(snap.partial);
        assert_eq!(snap.sources.values().filter(|o| o.is_error()).count(), 1);
        assert_eq!(snap.sources.values().filter(|o| !o.is_error()).count(), 4);
        match &snap.sources["b:feed"] {
            SourceOutcome::Error { kind, .. } => assert_eq!(kind, "network"),
            other => panic!("expected error marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hung_source_times_out_with_error_marker() {
        let agg = Aggregator::new(
            cache(),
            vec![spec("slow", Behavior::Hang), spec("fast", Behavior::Score(0.0))],
            Duration::from_secs(1),
        );
        let snap = agg.collect().await;
        assert!(snap.partial);
        match &snap.sources["slow:feed"] {
            SourceOutcome::Error { kind, .. } => assert_eq!(kind, "timeout"),
            other => panic!("expected timeout marker, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn timed_out_source_falls_back_to_stale_cache() {
        let shared = cache();
        let key = SourceKey::new("slow", "feed");
        // Pre-populate with an already-expired entry.
        shared
            .get_or_fetch(&key, Duration::from_millis(1), || async {
                Ok(RawItem::new("slow", Payload::Sentiment { score: 0.7, classification: "Greed".into() }))
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let agg = Aggregator::new(
            Arc::clone(&shared),
            vec![spec("slow", Behavior::Hang)],
            Duration::from_secs(1),
        );
        let snap = agg.collect().await;
        assert!(snap.partial, "stale fallback still counts as a degraded cycle");
        match &snap.sources["slow:feed"] {
            SourceOutcome::Ok { stale, .. } => assert!(stale),
            other => panic!("expected stale fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn snapshot_serializes_with_markers() {
        let agg = Aggregator::new(
            cache(),
            vec![spec("ok", Behavior::Score(0.5)), spec("down", Behavior::Fail)],
            Duration::from_secs(1),
        );
        let snap = agg.collect().await;
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["partial"], true);
        assert_eq!(json["sources"]["down:feed"]["status"], "error");
        assert_eq!(json["sources"]["ok:feed"]["status"], "ok");
    }
}
