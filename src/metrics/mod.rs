use crate::error::{GateError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GateError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "authgate_decisions_total",
            "Total number of gate decisions by kind"
        );
        describe_histogram!(
            "authgate_authenticate_duration_seconds",
            "Latency of the authenticate call in seconds"
        );
        describe_counter!(
            "authgate_authenticate_errors_total",
            "Total number of authenticate calls that failed at the transport level"
        );
        describe_counter!(
            "authgate_side_headers_merged_total",
            "Total number of responses that received authentication headers"
        );
        describe_counter!(
            "authgate_upstream_requests_total",
            "Total number of requests forwarded upstream"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a gate decision ("allow", "bypass", "redirect", "reject")
pub fn record_decision(kind: &'static str) {
    counter!("authgate_decisions_total", "decision" => kind).increment(1);
}

/// Record how long the authenticate call took
pub fn record_authenticate_duration(duration: f64) {
    histogram!("authgate_authenticate_duration_seconds").record(duration);
}

/// Record an authenticate call that errored instead of returning an outcome
pub fn record_authenticate_error() {
    counter!("authgate_authenticate_errors_total").increment(1);
}

/// Record a response that received side headers
pub fn record_side_headers_merged(count: usize) {
    counter!("authgate_side_headers_merged_total").increment(1);
    debug!(count, "Merged authentication headers into response");
}

/// Record a forwarded request
pub fn record_upstream_request(status: u16) {
    counter!("authgate_upstream_requests_total", "status" => status.to_string()).increment(1);
}
