//! Liveness, readiness, and the full health roll-up.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use ha_protocol::health::{ComponentStatus, HealthView};
use ha_supervisor::roll_up;

use crate::wiring::AppState;

/// Always 200 while the process is alive, matching the teacher's
/// always-200 liveness probe.
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// 200 once the hub session has completed its handshake at least once;
/// 503 otherwise, so a load balancer or init-container gate can wait on it.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    if state.session_state.borrow().is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(build_health_view(&state))
}

fn build_health_view(state: &AppState) -> HealthView {
    use std::sync::atomic::Ordering;

    let session_status = session_component_status(&state.session_state);
    let write_pipeline_status = write_pipeline_component_status(&state.pipeline_health);

    let sources: std::collections::BTreeMap<_, _> = state
        .sources
        .iter()
        .map(|(name, source)| (*name, source.health()))
        .collect();
    let source_statuses: Vec<ComponentStatus> = sources.values().map(|h| h.status).collect();
    let degraded_sources = sources
        .iter()
        .filter(|(_, h)| h.status != ComponentStatus::Healthy)
        .map(|(name, _)| *name)
        .collect();

    let status = roll_up(&[session_status, write_pipeline_status], &source_statuses);

    let last_event_nanos = state.rejection_counts.last_event_at.load(Ordering::Relaxed);
    let last_event_at = if last_event_nanos == 0 {
        None
    } else {
        chrono::DateTime::from_timestamp(last_event_nanos, 0)
    };

    let events_accepted = state.rejection_counts.events_accepted.load(Ordering::Relaxed);
    let uptime_minutes = (Utc::now() - state.started_at).num_seconds() as f64 / 60.0;
    let rolling_event_rate_per_min = if uptime_minutes > 0.0 {
        events_accepted as f64 / uptime_minutes
    } else {
        0.0
    };

    HealthView {
        status,
        session_status,
        last_event_at,
        last_successful_write_at: state.pipeline_health.last_successful_write_at(),
        sources,
        rolling_event_rate_per_min,
        batch_pending_count: state.pipeline_health.batch_pending_count(),
        consecutive_write_failures: state.pipeline_health.consecutive_write_failures(),
        degraded_sources,
    }
}

fn session_component_status(session_state: &tokio::sync::watch::Receiver<ha_client::SessionState>) -> ComponentStatus {
    use ha_client::SessionState;
    match *session_state.borrow() {
        SessionState::Subscribed => ComponentStatus::Healthy,
        SessionState::Connecting
        | SessionState::Authenticating
        | SessionState::Subscribing
        | SessionState::Reconnecting => ComponentStatus::Degraded,
        SessionState::Disconnected | SessionState::Stopped => ComponentStatus::Unhealthy,
    }
}

/// `degraded` once 60s have passed with no successful write, `unhealthy`
/// once 5 minutes have, per the user-visible-behavior table.
fn write_pipeline_component_status(health: &ha_write_pipeline::PipelineHealth) -> ComponentStatus {
    match health.last_successful_write_at() {
        None if health.consecutive_write_failures() == 0 => ComponentStatus::Healthy,
        None => ComponentStatus::Degraded,
        Some(last) => {
            let age = Utc::now() - last;
            if age < chrono::Duration::seconds(60) {
                ComponentStatus::Healthy
            } else if age < chrono::Duration::minutes(5) {
                ComponentStatus::Degraded
            } else {
                ComponentStatus::Unhealthy
            }
        }
    }
}
