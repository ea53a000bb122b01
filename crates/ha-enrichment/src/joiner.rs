//! Enrichment Joiner: attaches the current snapshot of every configured
//! source to a NormalizedEvent, never blocking on a source.

use std::collections::BTreeMap;
use std::sync::Arc;

use ha_protocol::model::{EnrichedEvent, EnrichmentValue, NormalizedEvent, SourceName};

use crate::framework::ErasedSource;

/// Holds the registered sources and produces `EnrichedEvent`s. Registration
/// is purely additive: a source absent from `sources` is simply omitted
/// from every event's `enrichments` map.
pub struct Joiner {
    sources: BTreeMap<SourceName, Arc<dyn ErasedSource>>,
}

impl Joiner {
    pub fn new(sources: BTreeMap<SourceName, Arc<dyn ErasedSource>>) -> Self {
        Joiner { sources }
    }

    /// Snapshot every source's `current()` at this moment and attach it.
    /// The snapshot reflects the instant of the join, not `time_fired`.
    pub fn join(&self, normalized: NormalizedEvent) -> EnrichedEvent {
        let mut enrichments = BTreeMap::new();
        for (name, source) in &self.sources {
            if let Some((values, as_of, fresh)) = source.current() {
                enrichments.insert(*name, EnrichmentValue { values, as_of, fresh });
            }
        }
        EnrichedEvent {
            normalized,
            enrichments,
        }
    }
}
