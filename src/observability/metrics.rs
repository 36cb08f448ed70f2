//! # Metrics
//!
//! Metric names recorded by the gateway and the Prometheus recorder that
//! exports them. Recording goes through the `metrics` macros; without an
//! installed recorder those calls are no-ops.

use crate::core::error::{GatewayError, GatewayResult};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Proxy responses by `X-Cache` status (`status` label)
pub const CACHE_RESULTS_TOTAL: &str = "gateway_cache_results_total";
/// Requests rejected by the rate limiter
pub const RATE_LIMITED_TOTAL: &str = "gateway_rate_limited_total";
/// Upstream calls by `outcome` label
pub const UPSTREAM_REQUESTS_TOTAL: &str = "gateway_upstream_requests_total";
/// Upstream fetch latency
pub const UPSTREAM_DURATION_SECONDS: &str = "gateway_upstream_duration_seconds";

const UPSTREAM_DURATION_BUCKETS: &[f64] = &[0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

fn builder() -> GatewayResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(UPSTREAM_DURATION_SECONDS.to_string()),
            UPSTREAM_DURATION_BUCKETS,
        )
        .map_err(|e| GatewayError::config(format!("Failed to set histogram buckets: {}", e)))
}

/// Install the global Prometheus recorder and return its render handle.
pub fn install_prometheus_recorder() -> GatewayResult<PrometheusHandle> {
    let handle = builder()?
        .install_recorder()
        .map_err(|e| GatewayError::config(format!("Failed to install metrics recorder: {}", e)))?;
    describe_metrics();
    Ok(handle)
}

pub fn describe_metrics() {
    describe_counter!(CACHE_RESULTS_TOTAL, "Proxy responses by cache status");
    describe_counter!(RATE_LIMITED_TOTAL, "Proxy requests rejected by the rate limiter");
    describe_counter!(UPSTREAM_REQUESTS_TOTAL, "Upstream requests by outcome");
    describe_histogram!(
        UPSTREAM_DURATION_SECONDS,
        Unit::Seconds,
        "Upstream fetch latency"
    );
}
