//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the vidfetch server:
//! - HTTP request metrics (latency, counts, errors)
//! - Job lifecycle metrics
//! - Proxy gateway metrics

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "vidfetch_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("vidfetch_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "vidfetch_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vidfetch_auth_failures_total",
            "Total authentication failures",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs created since startup.
pub static JOBS_CREATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vidfetch_jobs_created_total",
        "Total download jobs created since startup",
    )
    .unwrap()
});

/// Dedup hits on job submission.
pub static JOBS_DEDUP_HITS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vidfetch_jobs_dedup_hits_total",
        "Job submissions answered by an existing job",
    )
    .unwrap()
});

/// Submissions rejected by the quota manager.
pub static JOBS_QUOTA_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "vidfetch_jobs_quota_rejected_total",
        "Job submissions rejected because the daily quota was reached",
    )
    .unwrap()
});

// =============================================================================
// Proxy Gateway Metrics
// =============================================================================

/// Proxied segment fetches by outcome.
pub static PROXY_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "vidfetch_proxy_requests_total",
            "Segment proxy requests by outcome",
        ),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    registry
        .register(Box::new(JOBS_CREATED_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(JOBS_DEDUP_HITS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(JOBS_QUOTA_REJECTED_TOTAL.clone()))
        .unwrap();

    registry
        .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
        .unwrap();
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    let uuid_regex = regex_lite::Regex::new(
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
    )
    .unwrap();
    let numeric_regex = regex_lite::Regex::new(r"/\d+(/|$)").unwrap();

    let result = uuid_regex.replace_all(path, "{id}");
    let result = numeric_regex.replace_all(&result, "/{id}$1");
    result.to_string()
}
