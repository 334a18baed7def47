//! `ChannelObserver`.

use serde_json::Value;

use crate::codec::BulkResponse;
use crate::error::IngestError;
use crate::types::BulkOperation;

/// Export statistics passed to `on_export_response`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportStats {
    pub ok: usize,
    pub retryable: usize,
    pub fatal: usize,
}

/// All methods default to no-ops; implementors override only the hooks
/// they care about.
pub trait ChannelObserver: Send + Sync {
    fn on_export_buffer(&self, _page_len: usize) {}
    fn on_export_attempt(&self, _retries: u32, _item_count: usize) {}
    fn on_export_response(&self, _response: &BulkResponse, _stats: ExportStats) {}
    fn on_export_retry(&self, _items: &[BulkOperation]) {}
    fn on_export_max_retries(&self, _items: &[BulkOperation], _error: Option<&Value>) {}
    fn on_export_exception(&self, _err: &IngestError) {}
    fn on_inbound_publish(&self) {}
    fn on_inbound_publish_failure(&self) {}
    fn on_outbound_publish(&self) {}
    fn on_outbound_publish_failure(&self) {}
    fn on_inbound_channel_started(&self) {}
    fn on_inbound_channel_exited(&self) {}
    fn on_outbound_channel_started(&self) {}
    fn on_outbound_channel_exited(&self) {}
}

/// An observer that does nothing, used when the caller has no interest in
/// the lifecycle callbacks.
pub struct NoopObserver;

impl ChannelObserver for NoopObserver {}
