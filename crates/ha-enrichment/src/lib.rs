//! Enrichment Source framework (ticker, rate limiter, circuit breaker,
//! cache), the six concrete sources, and the Joiner that attaches their
//! snapshots to normalized events.

pub mod framework;
pub mod joiner;
pub mod sources;

pub use framework::{EnrichmentSource, ErasedSource, Fetch, SourceConfig, SourceError};
pub use joiner::Joiner;
