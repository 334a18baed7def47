//! Concrete Elasticsearch transport for `ingest-core`: environment-driven
//! connection configuration and a `reqwest`-backed implementation of
//! `ingest_core::transport::Transport`.

pub mod config;
pub mod transport;

pub use config::{data_stream_name, resolve_namespace, ChannelEnvConfig, ElasticConfig};
pub use transport::ElasticTransport;
