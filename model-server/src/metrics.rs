//! Prometheus metrics for model server observability
//!
//! Exposes metrics at /metrics endpoint for scraping by Prometheus.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;

/// Global Prometheus handle
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metric names
pub const PREDICTIONS_TOTAL: &str = "vision_predictions_total";
pub const PREDICTION_LATENCY: &str = "vision_prediction_latency_seconds";
pub const RATE_LIMIT_HITS: &str = "vision_rate_limit_hits_total";
pub const BUDGET_REMAINING: &str = "vision_budget_remaining";

/// Initialize the metrics system
pub fn init_metrics() -> Result<(), BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    if METRICS_HANDLE.set(handle).is_err() {
        tracing::warn!("Metrics already initialized");
        return Ok(());
    }

    // Describe metrics for Prometheus
    describe_counter!(PREDICTIONS_TOTAL, "Total prediction requests by result");
    describe_histogram!(PREDICTION_LATENCY, "Prediction latency in seconds");
    describe_counter!(RATE_LIMIT_HITS, "Prediction requests rejected by the budget");
    describe_gauge!(BUDGET_REMAINING, "Prediction calls left in the budget");

    tracing::info!("Metrics system initialized");
    Ok(())
}

/// Handler for /metrics endpoint
pub async fn metrics_handler() -> String {
    METRICS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// Record a finished prediction and how long it took
pub fn record_prediction(duration: Duration, succeeded: bool) {
    let result = if succeeded { "ok" } else { "error" };
    counter!(PREDICTIONS_TOTAL, "result" => result).increment(1);
    histogram!(PREDICTION_LATENCY).record(duration.as_secs_f64());
}

/// Record a request rejected by the budget
pub fn record_rate_limit_hit() {
    counter!(RATE_LIMIT_HITS).increment(1);
}

/// Set the remaining budget
pub fn set_budget_remaining(remaining: i64) {
    gauge!(BUDGET_REMAINING).set(remaining as f64);
}
