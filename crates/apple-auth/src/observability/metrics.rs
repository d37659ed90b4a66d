//! Metrics definitions for identity token verification.
//!
//! All metrics follow Prometheus naming conventions:
//! - `apple_auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `cache`: one value per key-set cache (currently `apple`)
//! - `result`: 3 values (hit, miss, coalesced)
//! - `status`: 2 values (success, error)
//! - `outcome`: 2 values (success, failure)
//! - `error_type`: bounded by `AuthError` variants
//!
//! Tokens, subjects and key IDs are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Key-set fetches: a healthy provider answers well under a second
        .set_buckets_for_metric(
            Matcher::Full("apple_auth_jwks_refresh_duration_seconds".to_string()),
            &[0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set key set refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Key Set Cache Metrics
// ============================================================================

/// Record a key-set cache lookup
///
/// Metric: `apple_auth_jwks_cache_total`
/// Labels: `cache`, `result` (hit, miss, coalesced)
///
/// `coalesced` counts callers that joined a refresh another caller started.
pub fn record_cache_lookup(cache: &'static str, result: &'static str) {
    counter!("apple_auth_jwks_cache_total",
        "cache" => cache,
        "result" => result
    )
    .increment(1);
}

/// Record a completed key-set refresh
///
/// Metric: `apple_auth_jwks_refresh_total`, `apple_auth_jwks_refresh_duration_seconds`
/// Labels: `cache`, `status`
pub fn record_key_set_refresh(cache: &'static str, status: &'static str, duration: Duration) {
    histogram!("apple_auth_jwks_refresh_duration_seconds",
        "cache" => cache
    )
    .record(duration.as_secs_f64());

    counter!("apple_auth_jwks_refresh_total",
        "cache" => cache,
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Verification Metrics
// ============================================================================

/// Record a token verification outcome
///
/// Metric: `apple_auth_token_verifications_total`
/// Labels: `outcome`, `error_type` ("none" on success)
pub fn record_token_verification(outcome: &'static str, error_type: Option<&'static str>) {
    counter!("apple_auth_token_verifications_total",
        "outcome" => outcome,
        "error_type" => error_type.unwrap_or("none")
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================
