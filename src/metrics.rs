//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, Opts, Registry};
use std::time::Duration;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // OAuth Metrics
    pub static ref OAUTH_CALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("portcullis_oauth_callbacks_total", "Total number of OAuth callbacks handled"),
        &["provider", "outcome"]
    ).expect("metric can be created");
    pub static ref PROVIDER_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "portcullis_provider_request_duration_seconds",
            "Identity provider HTTP call duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["provider", "call"]
    ).expect("metric can be created");

    // Session Metrics
    pub static ref SESSIONS_ISSUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("portcullis_sessions_issued_total", "Total number of session tokens issued"),
        &["provider"]
    ).expect("metric can be created");
    pub static ref SESSION_RESOLUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("portcullis_session_resolutions_total", "Total number of session cookie resolutions"),
        &["outcome"]
    ).expect("metric can be created");

    // Store Metrics
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("portcullis_store_operations_total", "Total number of keyed record store operations"),
        &["operation", "backend"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("portcullis_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(OAUTH_CALLBACKS_TOTAL.clone()))
        .expect("OAUTH_CALLBACKS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_REQUEST_DURATION_SECONDS.clone()))
        .expect("PROVIDER_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_ISSUED_TOTAL.clone()))
        .expect("SESSIONS_ISSUED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SESSION_RESOLUTIONS_TOTAL.clone()))
        .expect("SESSION_RESOLUTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STORE_OPERATIONS_TOTAL.clone()))
        .expect("STORE_OPERATIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Record the latency of one identity provider call.
pub fn observe_provider_call(provider: &str, call: &str, elapsed: Duration) {
    PROVIDER_REQUEST_DURATION_SECONDS
        .with_label_values(&[provider, call])
        .observe(elapsed.as_secs_f64());
}
