//! The unit the Write Pipeline submits to the time-series store.

use serde::{Deserialize, Serialize};

use crate::model::EnrichedEvent;

/// One point, tagged with the idempotency key the store uses to dedupe
/// retried writes of the same logical event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePoint {
    pub event: EnrichedEvent,
    pub idempotency_key: String,
}

/// An ordered sequence of points destined for one measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteBatch {
    pub measurement: String,
    pub points: Vec<WritePoint>,
}

impl WriteBatch {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Split a multi-point batch in half, preserving insertion order within
    /// each half. Used when a non-transient error forces bisection.
    ///
    /// # Panics
    /// Panics if called on a batch of fewer than 2 points; callers must
    /// check `len() > 1` first (a single-point batch is dead-lettered, not
    /// bisected).
    pub fn bisect(mut self) -> (WriteBatch, WriteBatch) {
        assert!(self.points.len() > 1, "cannot bisect a batch of <= 1 point");
        let mid = self.points.len() / 2;
        let second_half = self.points.split_off(mid);
        (
            WriteBatch {
                measurement: self.measurement.clone(),
                points: self.points,
            },
            WriteBatch {
                measurement: self.measurement,
                points: second_half,
            },
        )
    }
}
