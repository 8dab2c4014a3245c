//! Anomaly detection over per-metric time series.
//!
//! The detector owns one bounded [`TimeSeriesWindow`] per metric, created
//! lazily on first observation and kept for the process lifetime. Each
//! `evaluate` call runs every registered rule strategy against the current
//! window; rules that cannot evaluate stay silent, so detection is
//! best-effort and deterministic.

pub mod rules;
pub mod window;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use rules::{
    AlertEvent, DetectorRule, MagnitudeRule, MetricContext, MetricKind, ThresholdRule, Thresholds,
    ZScoreRule,
};
use window::TimeSeriesWindow;

/// Detection thresholds; defaults are documented configuration inputs, all
/// overridable globally and per metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Samples retained per metric window (1440 = 24h at one per minute)
    pub window_max_samples: usize,
    /// Samples required before the statistical rule activates
    pub min_samples: usize,
    /// Percent change firing a price_change alert
    pub price_change_pct: f64,
    /// Reference distance (in samples) for the percent-change rule
    pub price_reference_offset: usize,
    /// USD floor firing a whale_alert
    pub whale_threshold_usd: f64,
    /// Standard deviations firing an anomaly alert
    pub zscore_threshold: f64,
    /// Samples fed to the pattern classifier
    pub pattern_lookback: usize,
    /// Per-metric threshold overrides keyed by metric name
    pub overrides: HashMap<String, MetricOverrides>,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_max_samples: 1440,
            min_samples: 12,
            price_change_pct: 5.0,
            price_reference_offset: 60,
            whale_threshold_usd: 1_000_000.0,
            zscore_threshold: 3.0,
            pattern_lookback: 8,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricOverrides {
    pub change_pct: Option<f64>,
    pub reference_offset: Option<usize>,
    pub whale_threshold_usd: Option<f64>,
    pub zscore: Option<f64>,
    pub min_samples: Option<usize>,
}

impl AnomalyConfig {
    fn thresholds_for(&self, metric: &str) -> Thresholds {
        let ov = self.overrides.get(metric);
        Thresholds {
            change_pct: ov.and_then(|o| o.change_pct).unwrap_or(self.price_change_pct),
            reference_offset: ov
                .and_then(|o| o.reference_offset)
                .unwrap_or(self.price_reference_offset),
            whale_threshold_usd: ov
                .and_then(|o| o.whale_threshold_usd)
                .unwrap_or(self.whale_threshold_usd),
            zscore: ov.and_then(|o| o.zscore).unwrap_or(self.zscore_threshold),
            min_samples: ov.and_then(|o| o.min_samples).unwrap_or(self.min_samples),
            pattern_lookback: self.pattern_lookback,
        }
    }
}

struct MetricWindow {
    kind: MetricKind,
    window: TimeSeriesWindow,
}

pub struct AnomalyDetector {
    config: AnomalyConfig,
    rules: Vec<Box<dyn DetectorRule>>,
    windows: HashMap<String, MetricWindow>,
}

impl AnomalyDetector {
    /// Detector with the built-in rule set: threshold, magnitude, z-score.
    pub fn new(config: AnomalyConfig) -> Self {
        Self::with_rules(
            config,
            vec![Box::new(ThresholdRule), Box::new(MagnitudeRule), Box::new(ZScoreRule)],
        )
    }

    /// Detector with a caller-supplied rule set. Statistical and learned
    /// detectors plug in through the same [`DetectorRule`] seam.
    pub fn with_rules(config: AnomalyConfig, rules: Vec<Box<dyn DetectorRule>>) -> Self {
        Self { config, rules, windows: HashMap::new() }
    }

    /// Append one observation; the metric's window is created lazily.
    pub fn observe(&mut self, metric: &str, kind: MetricKind, timestamp: DateTime<Utc>, value: f64) {
        let max = self.config.window_max_samples;
        let entry = self
            .windows
            .entry(metric.to_string())
            .or_insert_with(|| MetricWindow { kind, window: TimeSeriesWindow::new(max) });
        entry.window.push(timestamp, value);
    }

    /// Run all applicable rules for one metric. Unknown metrics and windows
    /// with too little data yield no events.
    pub fn evaluate(&self, metric: &str) -> Vec<AlertEvent> {
        let Some(mw) = self.windows.get(metric) else {
            return Vec::new();
        };
        let thresholds = self.config.thresholds_for(metric);
        let ctx = MetricContext { metric, kind: mw.kind, window: &mw.window, thresholds: &thresholds };
        self.rules.iter().filter_map(|rule| rule.evaluate(&ctx)).collect()
    }

    /// Evaluate every tracked metric, in stable (sorted) metric order.
    pub fn evaluate_all(&self) -> Vec<AlertEvent> {
        let mut metrics: Vec<&String> = self.windows.keys().collect();
        metrics.sort();
        metrics.into_iter().flat_map(|m| self.evaluate(m)).collect()
    }

    pub fn tracked_metrics(&self) -> usize {
        self.windows.len()
    }

    pub fn window_len(&self, metric: &str) -> usize {
        self.windows.get(metric).map(|mw| mw.window.len()).unwrap_or(0)
    }
}
