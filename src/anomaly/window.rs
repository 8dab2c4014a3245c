//! Bounded time-series window per tracked metric.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// One observation inside a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Append-only window of the last `max_samples` observations, oldest first.
/// Eviction happens from the front once the bound is exceeded.
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    samples: VecDeque<Sample>,
    max_samples: usize,
}

impl TimeSeriesWindow {
    pub fn new(max_samples: usize) -> Self {
        Self { samples: VecDeque::with_capacity(max_samples.min(4096)), max_samples: max_samples.max(1) }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, value: f64) {
        self.samples.push_back(Sample { timestamp, value });
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The oldest sample among the last `n`, i.e. the reference point "n
    /// samples back" counting the latest as the first. None when fewer than
    /// `n` samples are held.
    pub fn reference(&self, n: usize) -> Option<&Sample> {
        if n == 0 || self.samples.len() < n {
            return None;
        }
        self.samples.get(self.samples.len() - n)
    }

    /// Values oldest-first.
    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    /// The last `n` values oldest-first (all of them when fewer are held).
    pub fn tail_values(&self, n: usize) -> Vec<f64> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.value).collect()
    }

    /// Rolling mean and sample standard deviation over every sample except
    /// the latest; the latest is what gets scored against them. None when
    /// fewer than three samples are held (std-dev needs two predecessors).
    pub fn preceding_mean_std(&self) -> Option<(f64, f64)> {
        if self.samples.len() < 3 {
            return None;
        }
        let preceding: Vec<f64> =
            self.samples.iter().take(self.samples.len() - 1).map(|s| s.value).collect();
        let mean = statistical::mean(&preceding);
        let std = statistical::standard_deviation(&preceding, Some(mean));
        Some((mean, std))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_of(values: &[f64]) -> TimeSeriesWindow {
        let mut w = TimeSeriesWindow::new(100);
        for (i, v) in values.iter().enumerate() {
            w.push(Utc::now() + chrono::Duration::seconds(i as i64), *v);
        }
        w
    }

    #[test]
    fn bound_is_never_exceeded() {
        let mut w = TimeSeriesWindow::new(3);
        for i in 0..10 {
            w.push(Utc::now(), i as f64);
            assert!(w.len() <= 3);
        }
        assert_eq!(w.values(), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn reference_counts_latest_as_first() {
        let w = window_of(&[100.0, 101.0, 99.0, 102.0]);
        // 4 samples back from a 4-sample window is the oldest one.
        assert_eq!(w.reference(4).unwrap().value, 100.0);
        assert_eq!(w.reference(1).unwrap().value, 102.0);
        assert!(w.reference(5).is_none());
        assert!(w.reference(0).is_none());
    }

    #[test]
    fn preceding_stats_exclude_latest() {
        let w = window_of(&[10.0, 10.0, 10.0, 40.0]);
        let (mean, std) = w.preceding_mean_std().unwrap();
        assert_eq!(mean, 10.0);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn stats_need_three_samples() {
        assert!(window_of(&[1.0, 2.0]).preceding_mean_std().is_none());
        assert!(window_of(&[1.0, 2.0, 3.0]).preceding_mean_std().is_some());
    }

    #[test]
    fn tail_values_clamps_to_length() {
        let w = window_of(&[1.0, 2.0, 3.0]);
        assert_eq!(w.tail_values(2), vec![2.0, 3.0]);
        assert_eq!(w.tail_values(10), vec![1.0, 2.0, 3.0]);
    }
}
