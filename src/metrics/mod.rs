//! Prometheus metrics recorder.
//!
//! Counters are emitted through the `metrics` facade by the cache layer
//! (hits/misses/stale serves) and the dispatcher (delivered/suppressed/
//! failed alerts); this module installs the global recorder once and keeps
//! the handle for exposition.

use once_cell::sync::OnceCell;
use std::error::Error;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global Prometheus recorder. Must run once at startup before
/// any counter is emitted; later calls are a no-op.
pub fn init() -> Result<(), Box<dyn Error + Send + Sync>> {
    if PROM_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

/// Render the current metrics in Prometheus exposition format, if the
/// recorder has been installed.
pub fn render() -> Option<String> {
    PROM_HANDLE.get().map(|h| h.render())
}
