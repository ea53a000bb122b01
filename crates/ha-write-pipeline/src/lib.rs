//! Write Pipeline: batches `EnrichedEvent`s, writes them to the downstream
//! time-series store with retry/bisect/dead-letter handling, and forms the
//! downstream end of the system's single backpressure chain.

pub mod dead_letter;
pub mod pipeline;
pub mod store_client;

pub use dead_letter::DeadLetterLog;
pub use pipeline::{PipelineConfig, PipelineHealth, WritePipeline};
pub use store_client::{StoreClient, StoreClientConfig, StoreError};
