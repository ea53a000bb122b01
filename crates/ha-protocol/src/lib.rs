//! Shared wire types and canonical data model for the home-automation
//! ingestion core. Depended on by every other crate in the workspace, the
//! same role `rt-protocol` plays for the forwarder/server/receiver services.

pub mod health;
pub mod hub;
pub mod model;
pub mod write_batch;

pub use health::{ComponentStatus, HealthView, SourceHealth};
pub use hub::{
    AuthAccepted, AuthRejected, AuthRequest, EventFrame, HubError, HubFrame, Ping, Pong,
    SubscribeEvents, SubscribeOk,
};
pub use model::{
    EnrichedEvent, EnrichmentValue, EventContext, NormalizedEvent, Origin, RawEvent, RejectReason,
    SourceName, State,
};
pub use write_batch::{WriteBatch, WritePoint};
