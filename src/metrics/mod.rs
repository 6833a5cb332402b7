use crate::circuit_breaker::CircuitState;
use crate::error::{Result, ServiceError};
use axum::{
    extract::{MatchedPath, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder. Fails if one is already installed.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            ServiceError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A recorder that is not installed globally; renders an empty exposition.
    /// Used where several routers live in one process (tests).
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    fn register_metrics() {
        describe_counter!(
            "http_requests_total",
            "Total number of HTTP requests received"
        );
        describe_histogram!(
            "http_request_duration_seconds",
            "HTTP request latencies in seconds"
        );

        describe_counter!(
            "rate_limit_hit_total",
            "Requests rejected by a fixed or sliding window limiter"
        );
        describe_counter!(
            "brute_force_lockout_total",
            "Login attempts rejected because the ip/username pair is locked"
        );
        describe_counter!(
            "rate_limit_store_fallback_total",
            "Store operations that failed open"
        );

        describe_gauge!(
            "store_circuit_breaker_state",
            "Circuit breaker state (0 = closed, 1 = open, 2 = half-open)"
        );
        describe_counter!(
            "store_circuit_breaker_transitions_total",
            "Total number of circuit breaker state transitions"
        );

        describe_counter!(
            "auth_attempts_total",
            "Authentication flow outcomes"
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

/// Records request count and latency per matched route
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let timer = Timer::new(
        req.method().to_string(),
        req.extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string()),
    );

    let response = next.run(req).await;
    timer.record(response.status().as_u16());
    response
}

/// Record a request metric
pub fn record_request(method: &str, path: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", path.to_string()),
        ("status", status.to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(duration);
}

/// Record a fixed or sliding window denial
pub fn record_rate_limit_hit(service: &str) {
    let labels = [("service", service.to_string())];
    counter!("rate_limit_hit_total", &labels).increment(1);
}

/// Record a brute-force lockout denial
pub fn record_brute_force_lockout(service: &str) {
    let labels = [("service", service.to_string())];
    counter!("brute_force_lockout_total", &labels).increment(1);
}

/// Record a store operation that failed open
pub fn record_store_fallback(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!("rate_limit_store_fallback_total", &labels).increment(1);
}

/// Record circuit breaker state
pub fn record_circuit_breaker_state(breaker: &str, state: CircuitState) {
    let labels = [("breaker", breaker.to_string())];
    gauge!("store_circuit_breaker_state", &labels).set(state.gauge_value());
}

/// Record circuit breaker transition
pub fn record_circuit_breaker_transition(breaker: &str, from: CircuitState, to: CircuitState) {
    let labels = [
        ("breaker", breaker.to_string()),
        ("from", from.as_str().to_string()),
        ("to", to.as_str().to_string()),
    ];
    counter!("store_circuit_breaker_transitions_total", &labels).increment(1);
    record_circuit_breaker_state(breaker, to);
}

/// Record an authentication flow outcome
pub fn record_auth_attempt(flow: &str, outcome: &str) {
    let labels = [
        ("flow", flow.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!("auth_attempts_total", &labels).increment(1);
}

/// Timer for measuring request duration
pub struct Timer {
    start: Instant,
    method: String,
    path: String,
}

impl Timer {
    pub fn new(method: String, path: String) -> Self {
        Self {
            start: Instant::now(),
            method,
            path,
        }
    }

    /// Record the elapsed time with the given status code
    pub fn record(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(&self.method, &self.path, status, duration);
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
