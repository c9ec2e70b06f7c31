//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

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
    let _ = &*PROMETHEUS_HANDLE;
    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "flowgate_requests_total",
        "Chat completion requests by status and model"
    );
    metrics::describe_counter!(
        "flowgate_generation_attempts_total",
        "Backend generation attempts by outcome"
    );
    metrics::describe_counter!(
        "flowgate_captcha_solves_total",
        "Challenge solves by result"
    );
    metrics::describe_counter!(
        "flowgate_credential_disabled_total",
        "Credentials disabled by reason"
    );
    metrics::describe_histogram!(
        "flowgate_request_duration_seconds",
        "Request duration in seconds"
    );
    metrics::describe_histogram!(
        "flowgate_captcha_solve_seconds",
        "Challenge solve duration in seconds"
    );
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a request
pub fn record_request(status: &str, model: &str, duration_secs: f64) {
    metrics::counter!("flowgate_requests_total", "status" => status.to_string(), "model" => model.to_string())
        .increment(1);
    metrics::histogram!("flowgate_request_duration_seconds", "model" => model.to_string())
        .record(duration_secs);
}
