//! Transport-agnostic core of a buffered bulk-ingestion pipeline for
//! Elasticsearch-shaped clusters: a bounded producer-to-export channel,
//! the NDJSON bulk codec, pluggable bootstrap/provisioning/alias/rollover
//! strategies, a primary/secondary sync orchestrator, and an AI
//! enrichment loop. None of it depends on a concrete HTTP client; callers
//! provide a `Transport` implementation (see the `ingest-elastic` crate).

pub mod bootstrap;
pub mod buffer;
pub mod codec;
pub mod enrichment;
pub mod error;
pub mod hash;
pub mod helpers;
pub mod orchestrator;
pub mod strategy;
pub mod testing;
pub mod transport;
pub mod types;

pub use buffer::{BufferOptions, BufferedChannel, ChannelState};
pub use error::{IngestError, IngestResult};
pub use orchestrator::{
    CompletionOutcome, IncrementalSyncOrchestrator, PostCompleteHook, PreBootstrapTask, SyncStrategy,
};
pub use strategy::IngestStrategy;
pub use transport::{Method, Transport, TransportResponse};
pub use types::{DatePattern, EntityTarget, TypeContext};
