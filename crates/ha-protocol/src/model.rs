//! Canonical data model carried through the pipeline: RawEvent from the hub,
//! through Normalizer and Joiner, to the Write Pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Connection origin of a state change, as reported by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Origin {
    Local,
    Remote,
}

/// Context carried by every hub event, used for correlation and, together
/// with `entity_id` and `time_fired`, the write idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A single observed or actuated state of an entity.
///
/// `state` may be the empty string (a valid observation) but is never
/// absent — absence is represented by the caller not constructing a
/// `State` at all (see `RawEvent::old_state`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl State {
    /// `last_updated >= last_changed`, per the data model invariant.
    pub fn is_internally_consistent(&self) -> bool {
        self.last_updated >= self.last_changed
    }
}

/// An event as received from the hub connection, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_type: String,
    pub entity_id: String,
    pub time_fired: DateTime<Utc>,
    pub origin: Origin,
    pub context: EventContext,
    #[serde(default)]
    pub old_state: Option<State>,
    pub new_state: State,
    /// Opaque payload preserved for diagnostics; never interpreted.
    #[serde(default)]
    pub raw: Value,
}

/// Reason a RawEvent was rejected by the Normalizer. Never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidEntityId,
    NullState,
    UnparseableTimestamp,
    TimestampOrderViolation,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::InvalidEntityId => "invalid_entity_id",
            RejectReason::NullState => "null_state",
            RejectReason::UnparseableTimestamp => "unparseable_timestamp",
            RejectReason::TimestampOrderViolation => "timestamp_order_violation",
        }
    }
}

/// The canonical record the pipeline carries from the Normalizer onward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_type: String,
    pub entity_id: String,
    pub time_fired: DateTime<Utc>,
    pub origin: Origin,
    pub context: EventContext,
    pub old_state: Option<State>,
    pub new_state: State,

    /// Prefix of `entity_id` before the first `.`.
    pub domain: String,
    pub device_class: Option<String>,
    pub area: Option<String>,
    pub device_id: Option<String>,
    pub entity_category: Option<String>,
    /// Seconds between `old_state.last_changed` and `new_state.last_changed`.
    /// Clamped to `>= 0`; `None` when there is no `old_state`.
    pub duration_in_state: Option<f64>,
    pub normalized_value: Option<f64>,
    pub unit: Option<String>,
}

/// One source's contribution to an `EnrichedEvent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentValue {
    pub values: Value,
    pub as_of: DateTime<Utc>,
    pub fresh: bool,
}

/// The fixed set of enrichment source names, used as the `enrichments` map
/// key and for source registration/lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Weather,
    CarbonIntensity,
    ElectricityPricing,
    AirQuality,
    Calendar,
    SmartMeter,
}

impl SourceName {
    pub const ALL: [SourceName; 6] = [
        SourceName::Weather,
        SourceName::CarbonIntensity,
        SourceName::ElectricityPricing,
        SourceName::AirQuality,
        SourceName::Calendar,
        SourceName::SmartMeter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceName::Weather => "weather",
            SourceName::CarbonIntensity => "carbon_intensity",
            SourceName::ElectricityPricing => "electricity_pricing",
            SourceName::AirQuality => "air_quality",
            SourceName::Calendar => "calendar",
            SourceName::SmartMeter => "smart_meter",
        }
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A NormalizedEvent plus a snapshot of every configured enrichment source
/// taken at the moment of passage through the Joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(flatten)]
    pub normalized: NormalizedEvent,
    pub enrichments: BTreeMap<SourceName, EnrichmentValue>,
}

impl EnrichedEvent {
    /// Deterministic key identifying this logical write: a hash of
    /// `(entity_id, time_fired, context.id)`. Retries of the same logical
    /// event reuse the same key so the store can deduplicate by tag set.
    pub fn idempotency_seed(&self) -> String {
        let seed = format!(
            "{}|{}|{}",
            self.normalized.entity_id,
            self.normalized.time_fired.to_rfc3339(),
            self.normalized.context.id,
        );
        let digest = Sha256::digest(seed.as_bytes());
        hex::encode(digest)[..16].to_owned()
    }
}
