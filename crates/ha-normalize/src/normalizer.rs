//! Turns a `RawEvent` into a `NormalizedEvent`, or rejects it.

use std::collections::BTreeSet;

use ha_protocol::model::{NormalizedEvent, RawEvent, RejectReason};
use tracing::warn;

const SEVEN_DAYS_SECONDS: f64 = 7.0 * 24.0 * 3600.0;

/// Attribute keys pulled out of `new_state.attributes` onto the flattened
/// record. Fixed by the hub's device registry conventions, not configurable.
const DEVICE_CLASS_KEY: &str = "device_class";
const AREA_KEY: &str = "area";
const DEVICE_ID_KEY: &str = "device_id";
const ENTITY_CATEGORY_KEY: &str = "entity_category";
const UNIT_KEY: &str = "unit_of_measurement";

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Domains that don't trigger an "unknown domain" warning. Anything
    /// outside this set is still accepted, just logged.
    pub known_domains: BTreeSet<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        let known_domains = [
            "sensor",
            "binary_sensor",
            "light",
            "switch",
            "climate",
            "lock",
            "cover",
            "fan",
            "media_player",
            "person",
            "device_tracker",
            "weather",
            "calendar",
            "automation",
            "input_boolean",
            "camera",
        ]
        .into_iter()
        .map(str::to_owned)
        .collect();
        NormalizerConfig { known_domains }
    }
}

#[derive(Debug, Clone)]
pub enum NormalizeOutcome {
    Accepted(NormalizedEvent),
    Rejected {
        reason: RejectReason,
        entity_id: String,
    },
}

pub fn normalize(raw: RawEvent, cfg: &NormalizerConfig) -> NormalizeOutcome {
    if !is_valid_entity_id(&raw.entity_id) {
        return NormalizeOutcome::Rejected {
            reason: RejectReason::InvalidEntityId,
            entity_id: raw.entity_id,
        };
    }

    // `new_state.state` being non-null and `time_fired`/`last_changed`/
    // `last_updated` being parseable instants are both enforced by the wire
    // schema before a RawEvent exists at all: the fields are typed as
    // `DateTime<Utc>` and `String`, not `Option<...>` or free-form JSON, so a
    // malformed frame never survives deserialization to reach this point.
    if !raw.new_state.is_internally_consistent() {
        return NormalizeOutcome::Rejected {
            reason: RejectReason::TimestampOrderViolation,
            entity_id: raw.entity_id,
        };
    }

    let domain = raw
        .entity_id
        .split_once('.')
        .map(|(d, _)| d.to_owned())
        .unwrap_or_default();

    if !cfg.known_domains.contains(&domain) {
        warn!(entity_id = %raw.entity_id, domain = %domain, "event from unrecognized domain, accepting anyway");
    }

    let attrs = &raw.new_state.attributes;
    let device_class = string_attr(attrs, DEVICE_CLASS_KEY);
    let area = string_attr(attrs, AREA_KEY);
    let device_id = string_attr(attrs, DEVICE_ID_KEY);
    let entity_category = string_attr(attrs, ENTITY_CATEGORY_KEY);
    let unit = string_attr(attrs, UNIT_KEY);

    let duration_in_state = raw.old_state.as_ref().map(|old| {
        let raw_seconds = (raw.new_state.last_changed - old.last_changed).num_milliseconds() as f64
            / 1000.0;
        if raw_seconds < 0.0 {
            warn!(
                entity_id = %raw.entity_id,
                raw_seconds,
                "duration_in_state would be negative, clamping to 0"
            );
            0.0
        } else {
            if raw_seconds > SEVEN_DAYS_SECONDS {
                warn!(
                    entity_id = %raw.entity_id,
                    raw_seconds,
                    "duration_in_state exceeds 7 days"
                );
            }
            raw_seconds
        }
    });

    let normalized_value = raw.new_state.state.parse::<f64>().ok();

    NormalizeOutcome::Accepted(NormalizedEvent {
        event_type: raw.event_type,
        entity_id: raw.entity_id,
        time_fired: raw.time_fired,
        origin: raw.origin,
        context: raw.context,
        old_state: raw.old_state,
        new_state: raw.new_state,
        domain,
        device_class,
        area,
        device_id,
        entity_category,
        duration_in_state,
        normalized_value,
        unit,
    })
}

fn string_attr(attrs: &std::collections::BTreeMap<String, serde_json::Value>, key: &str) -> Option<String> {
    attrs.get(key).and_then(|v| v.as_str()).map(str::to_owned)
}

/// `^[a-z_]+\.[a-z0-9_]+$`, checked by hand rather than pulling in a regex
/// engine for one fixed pattern.
fn is_valid_entity_id(entity_id: &str) -> bool {
    let Some((domain, object_id)) = entity_id.split_once('.') else {
        return false;
    };
    if domain.is_empty() || object_id.is_empty() {
        return false;
    }
    let domain_ok = domain.chars().all(|c| c.is_ascii_lowercase() || c == '_');
    // `object_id`'s allowed charset excludes '.', so a second dot (e.g.
    // "a.b.c") already fails here without a separate multi-dot check.
    let object_ok = object_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    domain_ok && object_ok
}
