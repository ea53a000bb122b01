//! `RestartComponent`: clears a component's bounded-restart guard so it is
//! eligible to resume automatic restarts after an operator has fixed the
//! underlying cause (e.g. rotated a rejected credential).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use super::HttpErrorEnvelope;
use crate::wiring::AppState;

const KNOWN_COMPONENTS: &[&str] = &[
    "session",
    "normalizer",
    "joiner",
    "write_pipeline",
    "weather",
    "carbon_intensity",
    "electricity_pricing",
    "air_quality",
    "calendar",
    "smart_meter",
];

pub async fn restart_component(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    if !KNOWN_COMPONENTS.contains(&name.as_str()) {
        return (
            StatusCode::NOT_FOUND,
            Json(HttpErrorEnvelope {
                code: "NOT_FOUND".to_owned(),
                message: format!("unknown component '{name}'"),
                details: None,
            }),
        )
            .into_response();
    }

    let mut supervisor = state.supervisor.lock().await;
    supervisor.reset(&name);
    StatusCode::NO_CONTENT.into_response()
}
