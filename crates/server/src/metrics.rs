//! Prometheus metrics for the pallet server.
//!
//! Exposes counters for the upload session lifecycle, imported and
//! deduplicated content, and latency histograms for appends and finalize.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no upload ids, names or checksums, only aggregate counts.
//! Keep the endpoint network-restricted to the scraper in production.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload session metrics
pub static UPLOAD_SESSIONS_OPENED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_upload_sessions_opened_total",
        "Total number of upload sessions created",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_RESUMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_upload_sessions_resumed_total",
        "Total number of upload sessions re-attached by id",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_upload_sessions_aborted_total",
        "Total number of upload sessions aborted by clients",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_upload_sessions_expired_total",
        "Total number of upload sessions aborted by the reaper",
    )
    .expect("metric creation failed")
});

// Import metrics
pub static UPLOADS_FINALIZED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_uploads_finalized_total",
        "Total number of uploads successfully imported",
    )
    .expect("metric creation failed")
});

pub static IMPORTS_DEDUPLICATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_imports_deduplicated_total",
        "Total number of imports that reused an existing content object",
    )
    .expect("metric creation failed")
});

pub static INTEGRITY_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_integrity_failures_total",
        "Total number of finalize checksum mismatches",
    )
    .expect("metric creation failed")
});

pub static BYTES_APPENDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pallet_bytes_appended_total",
        "Total bytes accepted by append",
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static APPEND_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pallet_append_duration_seconds",
            "Time taken to make one append durable",
        )
        .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
    )
    .expect("metric creation failed")
});

pub static FINALIZE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "pallet_finalize_duration_seconds",
            "Time taken to verify and import an upload",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

// Error metrics
pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pallet_upload_errors_total",
            "Total request errors by error code",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Current state gauges
pub static OPEN_UPLOAD_SESSIONS: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pallet_open_upload_sessions",
        "Number of sessions accepting appends at the last reaper run",
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests may build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOAD_SESSIONS_OPENED.clone()),
            Box::new(UPLOAD_SESSIONS_RESUMED.clone()),
            Box::new(UPLOAD_SESSIONS_ABORTED.clone()),
            Box::new(UPLOAD_SESSIONS_EXPIRED.clone()),
            Box::new(UPLOADS_FINALIZED.clone()),
            Box::new(IMPORTS_DEDUPLICATED.clone()),
            Box::new(INTEGRITY_FAILURES.clone()),
            Box::new(BYTES_APPENDED.clone()),
            Box::new(APPEND_DURATION.clone()),
            Box::new(FINALIZE_DURATION.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(OPEN_UPLOAD_SESSIONS.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a failed request under its error code.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}
