//! HTTP routes for the demo service.
//!
//! Defines the Axum router and application state.

use crate::auth::AuthScope;
use crate::config::Config;
use crate::handlers;
use crate::middleware::require_apple_identity;
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
///
/// Shared behind an `Arc`: the key store inside `auth` is built once per
/// state and must not be duplicated.
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Verification scope holding the lazily built Apple key store.
    pub auth: AuthScope,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            auth: AuthScope::new(config.clone()),
            config,
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/v1/health` - Liveness and key-set cache status (public)
/// - `/metrics` - Prometheus scrape endpoint (public)
/// - `/v1/me` - Verified identity (requires an Apple identity token)
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/v1/health", get(handlers::health_check))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/v1/me", get(handlers::get_me))
        .layer(middleware::from_fn_with_state(state, require_apple_identity));

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    public_routes
        .merge(protected_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
