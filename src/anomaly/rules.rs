//! Detector rule strategies.
//!
//! Every rule — threshold, magnitude, statistical — implements
//! [`DetectorRule`] over the same window abstraction, so rule-based and
//! learned detectors are interchangeable and share fixtures. A rule that
//! cannot evaluate (wrong metric kind, insufficient samples, zero variance)
//! returns no event rather than erroring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::window::TimeSeriesWindow;

/// What a metric measures; selects which rules apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Price,
    Volume,
    Sentiment,
    Whale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Scale severity by how far past the threshold the value landed.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 4.0 {
            Severity::Critical
        } else if ratio >= 2.0 {
            Severity::High
        } else {
            Severity::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    PriceChange,
    WhaleAlert,
    Anomaly,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::PriceChange => "price_change",
            AlertKind::WhaleAlert => "whale_alert",
            AlertKind::Anomaly => "anomaly",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A qualified anomaly, ready for the dispatcher.
///
/// The timestamp is the latest window sample's timestamp (not the wall
/// clock), so re-evaluating an unchanged window yields identical events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub severity: Severity,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub pattern: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub dedupe_key: String,
}

impl AlertEvent {
    pub fn dedupe_key_for(kind: AlertKind, metric: &str) -> String {
        format!("{}:{}", kind, metric)
    }
}

/// Effective thresholds for one metric, after per-metric overrides.
#[derive(Debug, Clone)]
pub struct Thresholds {
    /// Percent change that fires the threshold rule
    pub change_pct: f64,
    /// How many samples back the threshold rule's reference sits
    pub reference_offset: usize,
    /// USD floor for the magnitude rule
    pub whale_threshold_usd: f64,
    /// Standard deviations that fire the statistical rule
    pub zscore: f64,
    /// Samples required before the statistical rule activates
    pub min_samples: usize,
    /// Samples fed to the pattern classifier
    pub pattern_lookback: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            change_pct: 5.0,
            reference_offset: 60,
            whale_threshold_usd: 1_000_000.0,
            zscore: 3.0,
            min_samples: 12,
            pattern_lookback: 8,
        }
    }
}

/// Everything a rule needs to score one metric.
pub struct MetricContext<'a> {
    pub metric: &'a str,
    pub kind: MetricKind,
    pub window: &'a TimeSeriesWindow,
    pub thresholds: &'a Thresholds,
}

pub trait DetectorRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &MetricContext<'_>) -> Option<AlertEvent>;
}

/// Percent change of the latest value against a reference N samples back.
pub struct ThresholdRule;

impl DetectorRule for ThresholdRule {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn evaluate(&self, ctx: &MetricContext<'_>) -> Option<AlertEvent> {
        if ctx.kind != MetricKind::Price {
            return None;
        }
        let latest = ctx.window.latest()?;
        let reference = ctx.window.reference(ctx.thresholds.reference_offset)?;
        if reference.value.abs() < f64::EPSILON {
            return None;
        }
        let change_pct = (latest.value - reference.value) / reference.value * 100.0;
        if change_pct.abs() < ctx.thresholds.change_pct {
            return None;
        }
        Some(AlertEvent {
            kind: AlertKind::PriceChange,
            severity: Severity::from_ratio(change_pct.abs() / ctx.thresholds.change_pct),
            metric: ctx.metric.to_string(),
            value: latest.value,
            threshold: ctx.thresholds.change_pct,
            pattern: None,
            timestamp: latest.timestamp,
            dedupe_key: AlertEvent::dedupe_key_for(AlertKind::PriceChange, ctx.metric),
        })
    }
}

/// Absolute USD magnitude for whale-type metrics; fires regardless of
/// history length.
pub struct MagnitudeRule;

impl DetectorRule for MagnitudeRule {
    fn name(&self) -> &'static str {
        "magnitude"
    }

    fn evaluate(&self, ctx: &MetricContext<'_>) -> Option<AlertEvent> {
        if ctx.kind != MetricKind::Whale {
            return None;
        }
        let latest = ctx.window.latest()?;
        if latest.value.abs() < ctx.thresholds.whale_threshold_usd {
            return None;
        }
        Some(AlertEvent {
            kind: AlertKind::WhaleAlert,
            severity: Severity::from_ratio(latest.value.abs() / ctx.thresholds.whale_threshold_usd),
            metric: ctx.metric.to_string(),
            value: latest.value,
            threshold: ctx.thresholds.whale_threshold_usd,
            pattern: None,
            timestamp: latest.timestamp,
            dedupe_key: AlertEvent::dedupe_key_for(AlertKind::WhaleAlert, ctx.metric),
        })
    }
}

/// Deviation of the latest value from the rolling mean of its predecessors,
/// in standard deviations. Inactive below the minimum sample count; zero
/// variance short-circuits to no event.
pub struct ZScoreRule;

impl DetectorRule for ZScoreRule {
    fn name(&self) -> &'static str {
        "zscore"
    }

    fn evaluate(&self, ctx: &MetricContext<'_>) -> Option<AlertEvent> {
        if ctx.kind == MetricKind::Whale {
            return None;
        }
        if ctx.window.len() < ctx.thresholds.min_samples.max(3) {
            return None;
        }
        let latest = ctx.window.latest()?;
        let (mean, std) = ctx.window.preceding_mean_std()?;
        if std < 1e-9 {
            return None;
        }
        let z = (latest.value - mean) / std;
        if z.abs() < ctx.thresholds.zscore {
            return None;
        }
        let pattern = classify_pattern(&ctx.window.tail_values(ctx.thresholds.pattern_lookback));
        Some(AlertEvent {
            kind: AlertKind::Anomaly,
            severity: Severity::from_ratio(z.abs() / ctx.thresholds.zscore),
            metric: ctx.metric.to_string(),
            value: latest.value,
            threshold: ctx.thresholds.zscore,
            pattern: pattern.map(str::to_string),
            timestamp: latest.timestamp,
            dedupe_key: AlertEvent::dedupe_key_for(AlertKind::Anomaly, ctx.metric),
        })
    }
}

/// Deterministic shape classification over the recent trajectory.
///
/// Checked in a fixed order so the label is reproducible:
/// a >30% run-up into a >20% give-back is a pump-and-dump, a single-tick
/// drop of >20% is a flash crash, and a near-monotonic climb (two thirds of
/// ticks rising) is a FOMO rally.
pub fn classify_pattern(values: &[f64]) -> Option<&'static str> {
    if values.len() < 3 {
        return None;
    }
    let first = values[0];
    let last = *values.last().expect("len checked above");

    let (peak_idx, peak) = values
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    if peak_idx > 0 && peak_idx < values.len() - 1 && first.abs() > f64::EPSILON {
        let rise = (peak - first) / first.abs();
        let fall = (peak - last) / peak.abs().max(f64::EPSILON);
        if rise > 0.3 && fall > 0.2 {
            return Some("pump_and_dump");
        }
    }

    let prev = values[values.len() - 2];
    if prev.abs() > f64::EPSILON && (last - prev) / prev.abs() <= -0.2 {
        return Some("flash_crash");
    }

    if values.len() >= 5 && last > first {
        let rises = values.windows(2).filter(|w| w[1] > w[0]).count();
        if rises * 3 >= (values.len() - 1) * 2 {
            return Some("fomo_rally");
        }
    }

    None
}
