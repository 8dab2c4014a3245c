//! # MarketSentry
//! Crypto-market monitoring pipeline: fetches heterogeneous signals (prices,
//! whale transfers, sentiment) from independent, rate-limited upstreams,
//! caches them with per-source freshness policies, scores the resulting time
//! series for anomalies and fans qualified alerts out to notification
//! channels.

pub use crate::utils::error::{Error, Result};

pub mod aggregator;
pub mod anomaly;
pub mod cache;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod notify;
pub mod source;
pub mod utils;
