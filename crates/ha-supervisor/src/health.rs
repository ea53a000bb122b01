//! System-wide health roll-up: worst of the core pipeline components, with
//! an exception for enrichment sources.

use ha_protocol::health::ComponentStatus;

/// Roll up core pipeline component statuses and enrichment source statuses
/// into one system status.
///
/// The exception: if every core component is healthy but one or more
/// enrichment sources are unhealthy, the system is `degraded`, never
/// `unhealthy` — a dead weather API should not page anyone the way a dead
/// store connection should.
pub fn roll_up(core_statuses: &[ComponentStatus], source_statuses: &[ComponentStatus]) -> ComponentStatus {
    let core_worst = core_statuses
        .iter()
        .copied()
        .fold(ComponentStatus::Healthy, ComponentStatus::worst);
    let source_worst = source_statuses
        .iter()
        .copied()
        .fold(ComponentStatus::Healthy, ComponentStatus::worst);

    if core_worst == ComponentStatus::Healthy && source_worst == ComponentStatus::Unhealthy {
        return ComponentStatus::Degraded;
    }
    core_worst.worst(source_worst)
}
