//! Read-only health roll-up types, shared between the Supervisor (which
//! builds them) and the operator HTTP surface (which serializes them).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::SourceName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// The ordering used for roll-up: worse status wins.
    fn rank(self) -> u8 {
        match self {
            ComponentStatus::Healthy => 0,
            ComponentStatus::Degraded => 1,
            ComponentStatus::Unhealthy => 2,
        }
    }

    pub fn worst(self, other: ComponentStatus) -> ComponentStatus {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub status: ComponentStatus,
    pub fetched_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cache_age_seconds: Option<i64>,
    pub circuit_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthView {
    pub status: ComponentStatus,
    pub session_status: ComponentStatus,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_successful_write_at: Option<DateTime<Utc>>,
    pub sources: BTreeMap<SourceName, SourceHealth>,
    pub rolling_event_rate_per_min: f64,
    pub batch_pending_count: u64,
    pub consecutive_write_failures: u32,
    pub degraded_sources: Vec<SourceName>,
}
