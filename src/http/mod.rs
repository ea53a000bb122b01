//! Operator HTTP surface: liveness/readiness probes, the full health
//! roll-up, and the mutating source/component admin routes.

pub mod components;
pub mod health;
pub mod sources;

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::wiring::AppState;

/// Uniform error body for every non-2xx response this surface returns.
#[derive(Debug, Serialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/v1/health", get(health::get_health))
        .route(
            "/api/v1/sources/{name}/config",
            get(sources::get_source_config).put(sources::put_source_config),
        )
        .route(
            "/api/v1/sources/{name}/snapshot",
            post(sources::trigger_snapshot),
        )
        .route(
            "/api/v1/components/{name}/restart",
            post(components::restart_component),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
