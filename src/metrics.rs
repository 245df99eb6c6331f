//! Prometheus metrics for ingestion runs
//!
//! Metrics include:
//! - fetch outcomes and latency per city request
//! - measurements written
//! - run outcomes
//! - fetches currently in flight

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, Histogram, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use tracing::error;

pub const OUTCOME_SUCCESS: &str = "success";

static FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "weather_fetches_total",
        "Total number of city fetches by outcome",
        &["outcome"]
    )
    .expect("Failed to create fetches metric")
});

static FETCH_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "weather_fetch_latency_seconds",
        "Latency of one fetch-and-persist in seconds",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("Failed to create fetch_latency metric")
});

static MEASUREMENTS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "weather_measurements_written_total",
        "Total number of measurement rows written"
    )
    .expect("Failed to create measurements_written metric")
});

static RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "weather_runs_total",
        "Total number of ingestion runs by outcome",
        &["outcome"]
    )
    .expect("Failed to create runs metric")
});

static IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "weather_fetches_in_flight",
        "Number of fetches currently holding a permit"
    )
    .expect("Failed to create in_flight metric")
});

/// Records a fetch outcome (`success` or an error kind)
pub fn record_fetch(outcome: &str, latency_secs: f64) {
    FETCHES.with_label_values(&[outcome]).inc();
    FETCH_LATENCY.observe(latency_secs);
}

pub fn record_measurement_written() {
    MEASUREMENTS_WRITTEN.inc();
}

/// Records a run outcome (`success`, `partial` or an error kind)
pub fn record_run(outcome: &str) {
    RUNS.with_label_values(&[outcome]).inc();
}

/// Tracks one in-flight fetch until dropped
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn new() -> Self {
        IN_FLIGHT.inc();
        Self
    }
}

impl Default for InFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT.dec();
    }
}

/// Collects all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::new();
    }

    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_metrics() {
        record_fetch(OUTCOME_SUCCESS, 0.05);
        record_fetch("http_status", 0.01);
        record_measurement_written();
        record_run("partial");
        {
            let _guard = InFlightGuard::new();
        }

        let metrics = gather_metrics();
        assert!(metrics.contains("weather_fetches_total"));
        assert!(metrics.contains("weather_fetch_latency_seconds"));
        assert!(metrics.contains("weather_measurements_written_total"));
        assert!(metrics.contains("weather_runs_total"));
        assert!(metrics.contains("weather_fetches_in_flight"));
    }
}
