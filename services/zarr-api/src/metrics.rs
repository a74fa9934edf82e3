//! Prometheus metrics for the gateway.

use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use zarr_core::CacheStats;

/// Install the global Prometheus recorder.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// Count a finished Zarr request.
pub fn record_request(kind: &'static str, status: u16, elapsed: Duration) {
    counter!("zarr_requests_total", "kind" => kind, "status" => status.to_string()).increment(1);
    histogram!("zarr_request_duration_ms", "kind" => kind)
        .record(elapsed.as_secs_f64() * 1000.0);
}

/// Publish read cache gauges before a scrape.
pub fn record_cache_stats(stats: &CacheStats) {
    gauge!("zarr_cache_entries").set(stats.entries as f64);
    gauge!("zarr_cache_bytes").set(stats.memory_bytes as f64);
    gauge!("zarr_cache_capacity_bytes").set(stats.capacity_bytes as f64);
    gauge!("zarr_cache_in_flight").set(stats.in_flight as f64);
    gauge!("zarr_cache_hit_rate").set(stats.hit_rate());
}
