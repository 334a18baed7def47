//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;

/// Unified error type returned by the channel, bootstrap engine, orchestrator
/// and enrichment loop.
#[derive(Debug, Error, Clone)]
pub enum IngestError {
    /// Producer tried to write while the inbound queue was full and it did
    /// not want to block.
    #[error("inbound queue is full")]
    InboundFull,

    /// A waiting call was cancelled before it could complete.
    #[error("operation cancelled")]
    Cancelled,

    /// A write was attempted outside the `Running` state.
    #[error("channel is closed or not running")]
    ChannelClosed,

    /// Transport error classified as retryable (timeouts, connection resets,
    /// 429/503 status codes).
    #[error("transient network error: {0}")]
    NetworkTransient(String),

    /// Transport error classified as non-retryable.
    #[error("fatal network error: {0}")]
    NetworkFatal(String),

    /// A bootstrap step failed. Propagation depends on `BootstrapMethod`.
    #[error("bootstrap step {step} failed: {message}")]
    StepFailure { step: String, message: String },

    /// `WaitForDrain` timed out on the primary channel during orchestration.
    #[error("primary channel drain timed out")]
    PrimaryDrainTimeout,

    /// The server-side reindex task reported a failure or never completed.
    #[error("reindex task failed: {0}")]
    ReindexTaskFailed(String),

    /// The `/_aliases` swap call failed.
    #[error("alias swap failed: {0}")]
    AliasSwapFailed(String),

    /// In multiplex mode, one of the two armed channels rejected the write.
    #[error("multiplex publish was only partially accepted")]
    MultiplexPartialPublish,

    /// The enrichment candidate query (staleness search) failed.
    #[error("candidate query failed: {0}")]
    CandidateQueryFailure(String),

    /// The `_inference/completion` call failed or returned an unparseable body.
    #[error("inference call failed: {0}")]
    InferenceFailure(String),

    /// The lookup-index bulk upsert failed.
    #[error("lookup upsert failed: {0}")]
    LookupUpsertError(String),

    /// The post-enrichment `_update_by_query` backfill task failed.
    #[error("backfill task failed: {0}")]
    BackfillTaskFailed(String),

    /// Catch-all for JSON (de)serialization problems.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all internal error with a message, used where no more specific
    /// variant applies.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

impl IngestError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        Self::Internal(err.to_string())
    }

    /// Classify an HTTP status code the way the bulk-item classifier does.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 503)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
