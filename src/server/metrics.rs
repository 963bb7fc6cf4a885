use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all scan scheduler metrics
const PREFIX: &str = "scan_scheduler";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Budget Ledger Metrics
    pub static ref BUDGET_DECISIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_budget_decisions_total"), "Budget admission decisions"),
        &["api", "decision"]
    ).expect("Failed to create budget_decisions_total metric");

    pub static ref LEDGER_FAILURES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_ledger_failures_total"),
        "Budget ledger storage failures (admission failed open)"
    ).expect("Failed to create ledger_failures_total metric");

    // Task Metrics
    pub static ref TASKS_ENQUEUED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_tasks_enqueued_total"),
        "Total scan tasks enqueued"
    ).expect("Failed to create tasks_enqueued_total metric");

    pub static ref TASK_OUTCOMES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_outcomes_total"), "Scan task outcomes"),
        &["outcome"]
    ).expect("Failed to create task_outcomes_total metric");

    pub static ref SEARCH_CALL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_search_call_duration_seconds"),
            "External search call duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])
    ).expect("Failed to create search_call_duration_seconds metric");

    // Executor Metrics
    pub static ref EXECUTOR_CYCLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_executor_cycles_total"), "Executor cycles run"),
        &["result"]
    ).expect("Failed to create executor_cycles_total metric");

    pub static ref EXECUTOR_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_executor_cycle_duration_seconds"),
            "Executor cycle duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0])
    ).expect("Failed to create executor_cycle_duration_seconds metric");

    // Profile Metrics
    pub static ref PROFILE_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_profile_transitions_total"), "Profile scan status transitions"),
        &["to"]
    ).expect("Failed to create profile_transitions_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BUDGET_DECISIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LEDGER_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_OUTCOMES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SEARCH_CALL_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(EXECUTOR_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EXECUTOR_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(PROFILE_TRANSITIONS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_budget_decision(api_name: &str, allowed: bool) {
    let decision = if allowed { "allowed" } else { "denied" };
    BUDGET_DECISIONS_TOTAL
        .with_label_values(&[api_name, decision])
        .inc();
}

pub fn record_ledger_failure() {
    LEDGER_FAILURES_TOTAL.inc();
}

pub fn record_tasks_enqueued(count: usize) {
    TASKS_ENQUEUED_TOTAL.inc_by(count as f64);
}

/// Outcome is one of completed, retrying, failed, skipped, released, reclaimed
pub fn record_task_outcome(outcome: &str) {
    TASK_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_task_outcomes(outcome: &str, count: usize) {
    TASK_OUTCOMES_TOTAL
        .with_label_values(&[outcome])
        .inc_by(count as f64);
}

pub fn record_search_call(duration: Duration) {
    SEARCH_CALL_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_executor_cycle(result: &str, duration: Duration) {
    EXECUTOR_CYCLES_TOTAL.with_label_values(&[result]).inc();
    EXECUTOR_CYCLE_DURATION_SECONDS.observe(duration.as_secs_f64());
}

pub fn record_profile_transition(to: &str) {
    PROFILE_TRANSITIONS_TOTAL.with_label_values(&[to]).inc();
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
