//! Health check handler.

use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response for `/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,

    /// Whether a fresh key set is cached. `false` before the first
    /// verification or after the cached set expired; not an error.
    pub key_set_cached: bool,

    /// Seconds until the cached key set expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_set_ttl_seconds: Option<u64>,
}

/// Handler for GET /v1/health
///
/// Liveness only: never touches the network, so a provider outage does not
/// make the service look dead.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "key_set_cached": true,
///   "key_set_ttl_seconds": 3412
/// }
/// ```
#[instrument(skip_all, name = "apple_auth.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ttl = state.auth.apple().key_set_ttl();

    Json(HealthResponse {
        status: "healthy",
        key_set_cached: ttl.is_some(),
        key_set_ttl_seconds: ttl.map(|ttl| ttl.as_secs()),
    })
}
