//! Per-source operator routes: inspect the effective (credential-masked)
//! config, rotate a credential, and force an out-of-schedule fetch.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use ha_protocol::model::SourceName;
use serde::{Deserialize, Serialize};

use super::HttpErrorEnvelope;
use crate::wiring::AppState;

/// Non-secret shape of a configured source, built once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDescriptor {
    pub endpoint: String,
    pub interval_secs: u64,
    pub ttl_secs: u64,
    pub max_stale_secs: u64,
}

fn parse_source_name(raw: &str) -> Option<SourceName> {
    SourceName::ALL.into_iter().find(|n| n.as_str() == raw)
}

fn not_found(name: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(HttpErrorEnvelope {
            code: "NOT_FOUND".to_owned(),
            message: format!("unknown or disabled source '{name}'"),
            details: None,
        }),
    )
        .into_response()
}

pub async fn get_source_config(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let Some(source_name) = parse_source_name(&name) else {
        return not_found(&name);
    };
    let Some(descriptor) = state.source_descriptors.get(&source_name) else {
        return not_found(&name);
    };

    Json(serde_json::json!({
        "name": source_name.as_str(),
        "endpoint": descriptor.endpoint,
        "interval_secs": descriptor.interval_secs,
        "ttl_secs": descriptor.ttl_secs,
        "max_stale_secs": descriptor.max_stale_secs,
        "credential": "***redacted***",
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct PutSourceConfigRequest {
    pub credential: String,
}

pub async fn put_source_config(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PutSourceConfigRequest>,
) -> impl IntoResponse {
    let Some(source_name) = parse_source_name(&name) else {
        return not_found(&name);
    };
    let Some(source) = state.sources.get(&source_name) else {
        return not_found(&name);
    };

    match source.rotate_credential(body.credential) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(HttpErrorEnvelope {
                code: "CREDENTIAL_ROTATION_UNSUPPORTED".to_owned(),
                message: e.to_string(),
                details: None,
            }),
        )
            .into_response(),
    }
}

pub async fn trigger_snapshot(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    let Some(source_name) = parse_source_name(&name) else {
        return not_found(&name);
    };
    let Some(source) = state.sources.get(&source_name) else {
        return not_found(&name);
    };

    source.trigger_snapshot();
    StatusCode::ACCEPTED.into_response()
}
