//! Event Normalizer: validates and flattens `RawEvent`s into the canonical
//! `NormalizedEvent` record, or rejects them with a counted reason.

pub mod normalizer;

pub use normalizer::{normalize, NormalizeOutcome, NormalizerConfig};
