//! Prometheus metrics
//!
//! The recorder is installed lazily on first use; `/metrics` renders it.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    // Force initialization of the lazy static
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "freight_cache_operations_total",
        "Total cache operations by operation and result"
    );
    metrics::describe_counter!(
        "freight_rate_limit_decisions_total",
        "Rate limit decisions by limiter and outcome"
    );
    metrics::describe_counter!(
        "freight_rate_limit_fallbacks_total",
        "Durable limiter calls that fell back to the memory limiter"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record cache operation
pub fn record_cache_operation(operation: &'static str, result: &'static str) {
    metrics::counter!(
        "freight_cache_operations_total",
        "operation" => operation,
        "result" => result
    )
    .increment(1);
}

/// Record a rate limit decision
pub fn record_rate_limit_decision(limiter: &'static str, outcome: &'static str) {
    metrics::counter!(
        "freight_rate_limit_decisions_total",
        "limiter" => limiter,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a durable → memory fallback
pub fn record_rate_limit_fallback() {
    metrics::counter!("freight_rate_limit_fallbacks_total").increment(1);
}
