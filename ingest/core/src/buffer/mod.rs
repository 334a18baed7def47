//! The buffered channel: a bounded two-stage pipeline from
//! producer writes to concurrent bulk exports.

pub mod exporter;
pub mod observer;
pub mod page;

use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::bootstrap::{BootstrapContext, BootstrapEngine};
use crate::error::{IngestError, IngestResult};
use crate::strategy::IngestStrategy;
use crate::transport::Transport;
use crate::types::TypeContext;

use exporter::{default_backoff, export_page, BackoffFn};
use observer::{ChannelObserver, NoopObserver};
use page::BatchPage;

/// `Created → Bootstrapped → Running ⇄ Draining → Drained → Disposed`.
/// Writes are rejected outside `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    Created = 0,
    Bootstrapped = 1,
    Running = 2,
    Draining = 3,
    Drained = 4,
    Disposed = 5,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Created,
            1 => ChannelState::Bootstrapped,
            2 => ChannelState::Running,
            3 => ChannelState::Draining,
            4 => ChannelState::Drained,
            _ => ChannelState::Disposed,
        }
    }
}

/// Tunables controlling inbound capacity, batching, and export concurrency.
pub struct BufferOptions {
    pub inbound_max_size: usize,
    pub outbound_max_size: usize,
    pub outbound_max_lifetime: Duration,
    pub export_max_concurrency: usize,
    pub export_max_retries: u32,
    pub export_backoff: BackoffFn,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            inbound_max_size: 10_000,
            outbound_max_size: 500,
            outbound_max_lifetime: Duration::from_secs(5),
            export_max_concurrency: 4,
            export_max_retries: 3,
            export_backoff: default_backoff(),
        }
    }
}

/// Quantities derived at construction.
#[derive(Debug, Clone, Copy)]
pub struct DerivedQuantities {
    pub max_concurrency: usize,
    pub batch_export_size: usize,
    pub drain_size: usize,
}

impl BufferOptions {
    pub fn derive(&self) -> DerivedQuantities {
        let num_cpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let max_concurrency = (self.inbound_max_size / self.outbound_max_size.max(1))
            .clamp(1, 2 * num_cpu)
            .min(self.export_max_concurrency.max(1));
        let batch_export_size = self
            .outbound_max_size
            .min((self.inbound_max_size / max_concurrency.max(1)).max(1));
        let drain_size = 100_000.min(2 * self.outbound_max_size);
        DerivedQuantities {
            max_concurrency,
            batch_export_size,
            drain_size,
        }
    }
}

/// A bounded producer-to-bulk-export pipeline for one document type.
///
/// `D` must serialize into the JSON body sent to Elasticsearch; the
/// surrounding `TypeContext<D>` supplies ids, content hashes, and
/// timestamps without the channel needing to know `D`'s shape.
pub struct BufferedChannel<D> {
    strategy: Arc<IngestStrategy<D>>,
    type_ctx: Arc<TypeContext<D>>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn ChannelObserver>,
    options: Arc<BufferOptions>,
    derived: DerivedQuantities,

    state: Arc<AtomicU8>,
    inflight: Arc<AtomicI64>,
    inbound_tx: mpsc::Sender<D>,
    inbound_rx: Mutex<Option<mpsc::Receiver<D>>>,
    drain_notify: Arc<tokio::sync::Notify>,
    channel_hash: Mutex<Option<String>>,
    concrete_index: Mutex<Option<String>>,
    templates_already_matched: std::sync::atomic::AtomicBool,
}

impl<D> BufferedChannel<D>
where
    D: Serialize + Send + Sync + 'static,
{
    pub fn new(
        strategy: IngestStrategy<D>,
        type_ctx: TypeContext<D>,
        transport: Arc<dyn Transport>,
        options: BufferOptions,
    ) -> Self {
        Self::with_observer(strategy, type_ctx, transport, options, Arc::new(NoopObserver))
    }

    pub fn with_observer(
        strategy: IngestStrategy<D>,
        type_ctx: TypeContext<D>,
        transport: Arc<dyn Transport>,
        options: BufferOptions,
        observer: Arc<dyn ChannelObserver>,
    ) -> Self {
        let derived = options.derive();
        let (inbound_tx, inbound_rx) = mpsc::channel(options.inbound_max_size);
        Self {
            strategy: Arc::new(strategy),
            type_ctx: Arc::new(type_ctx),
            transport,
            observer,
            options: Arc::new(options),
            derived,
            state: Arc::new(AtomicU8::new(ChannelState::Created as u8)),
            inflight: Arc::new(AtomicI64::new(0)),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            drain_notify: Arc::new(tokio::sync::Notify::new()),
            channel_hash: Mutex::new(None),
            concrete_index: Mutex::new(None),
            templates_already_matched: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn derived(&self) -> DerivedQuantities {
        self.derived
    }

    /// Runs the bootstrap steps for this channel's strategy, then resolves
    /// the concrete write target via the provisioning strategy, moving the
    /// channel from `Created` to `Bootstrapped`.
    pub async fn bootstrap(&self) -> IngestResult<()> {
        if self.state() != ChannelState::Created {
            return Err(IngestError::Internal(
                "bootstrap called outside Created state".into(),
            ));
        }

        let mut context = BootstrapContext::new(
            self.strategy.bootstrap_method,
            self.type_ctx.write_target.clone(),
            self.type_ctx.mappings_json(),
            self.type_ctx.settings_json(),
        );
        BootstrapEngine::run(&self.strategy.bootstrap_steps, self.transport.as_ref(), &mut context)
            .await?;

        let hash = context
            .channel_hash
            .unwrap_or_else(|| self.type_ctx.channel_hash(""));
        let resolved = self
            .strategy
            .provisioning
            .resolve(
                self.transport.as_ref(),
                &self.type_ctx.write_target,
                self.type_ctx.date_pattern.as_ref(),
                &hash,
                Utc::now(),
            )
            .await?;
        debug!(
            "bootstrap resolved write target {} (reused={})",
            resolved.name, resolved.reused
        );
        *self.channel_hash.lock().await = Some(hash);
        *self.concrete_index.lock().await = Some(resolved.name);
        self.templates_already_matched
            .store(context.templates_already_matched, Ordering::SeqCst);

        self.set_state(ChannelState::Bootstrapped);
        Ok(())
    }

    /// The channel hash computed during `bootstrap`. `None` before bootstrap runs.
    pub async fn channel_hash(&self) -> Option<String> {
        self.channel_hash.lock().await.clone()
    }

    /// The concrete index resolved during `bootstrap`.
    pub async fn concrete_index(&self) -> Option<String> {
        self.concrete_index.lock().await.clone()
    }

    /// True iff bootstrap found both component templates already carrying
    /// the current hash.
    pub fn templates_already_matched(&self) -> bool {
        self.templates_already_matched.load(Ordering::SeqCst)
    }

    pub fn write_alias(&self) -> Option<&str> {
        self.type_ctx.write_alias.as_deref()
    }

    pub fn type_ctx(&self) -> &TypeContext<D> {
        &self.type_ctx
    }

    /// Spawns the inbound batcher and the exporter pool, transitioning
    /// `Bootstrapped → Running`.
    pub async fn start(self: &Arc<Self>) -> IngestResult<()> {
        if self.state() != ChannelState::Bootstrapped {
            return Err(IngestError::Internal(
                "start called outside Bootstrapped state".into(),
            ));
        }
        let mut guard = self.inbound_rx.lock().await;
        let inbound_rx = guard
            .take()
            .ok_or_else(|| IngestError::Internal("channel already started".into()))?;
        drop(guard);

        self.set_state(ChannelState::Running);
        self.observer.on_inbound_channel_started();
        self.observer.on_outbound_channel_started();

        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.run_pipeline(inbound_rx).await;
        });
        Ok(())
    }

    /// Non-blocking write; returns `false` iff the inbound queue is full.
    pub fn try_write(&self, doc: D) -> bool {
        if self.state() != ChannelState::Running {
            self.observer.on_inbound_publish_failure();
            return false;
        }
        match self.inbound_tx.try_send(doc) {
            Ok(()) => {
                self.inflight.fetch_add(1, Ordering::SeqCst);
                self.observer.on_inbound_publish();
                true
            }
            Err(_) => {
                self.observer.on_inbound_publish_failure();
                false
            }
        }
    }

    /// Blocks until space is available, the channel closes, or `cancel`
    /// resolves.
    pub async fn wait_to_write(&self, doc: D, cancel: impl Future<Output = ()> + Send) -> bool {
        if self.state() != ChannelState::Running {
            self.observer.on_inbound_publish_failure();
            return false;
        }
        tokio::select! {
            result = self.inbound_tx.send(doc) => {
                match result {
                    Ok(()) => {
                        self.inflight.fetch_add(1, Ordering::SeqCst);
                        self.observer.on_inbound_publish();
                        true
                    }
                    Err(_) => {
                        self.observer.on_inbound_publish_failure();
                        false
                    }
                }
            }
            _ = cancel => {
                self.observer.on_inbound_publish_failure();
                false
            }
        }
    }

    /// True iff every currently-buffered item reached a terminal state
    /// before `max_wait`.
    pub async fn wait_for_drain(&self, max_wait: Duration) -> bool {
        self.set_state(ChannelState::Draining);
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if self.inflight.load(Ordering::SeqCst) <= 0 {
                self.set_state(ChannelState::Drained);
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            tokio::select! {
                _ = self.drain_notify.notified() => {}
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// Delegates to the alias strategy; only valid after drain.
    pub async fn apply_aliases(&self, concrete_index: &str) -> IngestResult<()> {
        if !matches!(self.state(), ChannelState::Drained) {
            return Err(IngestError::Internal(
                "apply_aliases called before drain completed".into(),
            ));
        }
        self.strategy
            .alias
            .apply(
                self.transport.as_ref(),
                concrete_index,
                self.type_ctx.write_alias.as_deref(),
                self.type_ctx.read_alias.as_deref(),
            )
            .await
    }

    /// Delegates to the rollover strategy; only valid after drain.
    pub async fn rollover(&self, alias: &str) -> IngestResult<Value> {
        if !matches!(self.state(), ChannelState::Drained) {
            return Err(IngestError::Internal(
                "rollover called before drain completed".into(),
            ));
        }
        let conditions = self.strategy.rollover_conditions.clone().ok_or_else(|| {
            IngestError::Internal("channel has no rollover conditions configured".into())
        })?;
        crate::strategy::rollover::rollover(self.transport.as_ref(), alias, &conditions).await
    }

    pub fn dispose(&self) {
        self.set_state(ChannelState::Disposed);
    }

    async fn run_pipeline(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<D>) {
        let concurrency = self.derived.max_concurrency.max(1);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
        let mut page = BatchPage::new(self.derived.batch_export_size);
        let batch_size = self.derived.batch_export_size.max(1);
        let max_lifetime = self.options.outbound_max_lifetime;
        let mut ticker = tokio::time::interval(max_lifetime.max(Duration::from_millis(10)));
        // One timestamp for the whole run: `DatePattern::use_batch_date`
        // relies on every item seeing the same `at`, so documents landing
        // on either side of a day boundary still resolve to the one
        // concrete index chosen at bootstrap.
        let batch_date = Utc::now();

        loop {
            tokio::select! {
                received = inbound_rx.recv() => {
                    match received {
                        Some(doc) => {
                            let doc_body = match serde_json::to_value(&doc) {
                                Ok(value) => value,
                                Err(err) => {
                                    self.observer.on_export_exception(&IngestError::from(err));
                                    self.inflight.fetch_sub(1, Ordering::SeqCst);
                                    self.drain_notify.notify_waiters();
                                    continue;
                                }
                            };
                            let operation = self.strategy.document_ingest.build_operation(
                                &self.type_ctx,
                                &doc,
                                doc_body,
                                batch_date,
                            );
                            page.push(operation);
                            if page.is_full(batch_size) {
                                self.flush(&mut page, &semaphore).await;
                            }
                        }
                        None => {
                            if !page.is_empty() {
                                self.flush(&mut page, &semaphore).await;
                            }
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !page.is_empty() && page.is_stale(max_lifetime) {
                        self.flush(&mut page, &semaphore).await;
                    }
                }
            }
        }

        self.observer.on_inbound_channel_exited();
        self.observer.on_outbound_channel_exited();
    }

    async fn flush(&self, page: &mut BatchPage, semaphore: &Arc<tokio::sync::Semaphore>) {
        let operations = page.take();
        let page_len = operations.len();
        if page_len == 0 {
            return;
        }
        let bulk_url = self.strategy.document_ingest.bulk_url(&self.type_ctx);
        let transport = Arc::clone(&self.transport);
        let observer = Arc::clone(&self.observer);
        let backoff = self.options.export_backoff.clone();
        let max_retries = self.options.export_max_retries;
        let inflight = Arc::clone(&self.inflight);
        let drain_notify = Arc::clone(&self.drain_notify);

        let permit = match Arc::clone(semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = export_page(
                transport.as_ref(),
                &bulk_url,
                operations,
                max_retries,
                &backoff,
                observer.as_ref(),
            )
            .await
            {
                warn!("page export failed terminally: {err}");
            }
            inflight.fetch_sub(page_len as i64, Ordering::SeqCst);
            drain_notify.notify_waiters();
        });
    }
}

impl<D> Drop for BufferedChannel<D> {
    fn drop(&mut self) {
        if self.state() != ChannelState::Disposed {
            info!("buffered channel dropped without explicit disposal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::alias::NoAlias;
    use crate::strategy::document_ingest::DataStreamIngest;
    use crate::strategy::provisioning::AlwaysCreate;
    use crate::testing::MockTransport;
    use crate::types::EntityTarget;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize, Clone)]
    struct Doc {
        value: String,
    }

    fn test_channel(transport: Arc<dyn Transport>) -> Arc<BufferedChannel<Doc>> {
        let strategy = IngestStrategy::new(
            Box::new(DataStreamIngest),
            Arc::new(AlwaysCreate),
            Arc::new(NoAlias),
        );
        let type_ctx = TypeContext::new(
            EntityTarget::DataStream,
            "logs-test",
            || json!({}),
            || json!({}),
            |_: &Doc| None,
            |_: &Doc| None,
            |_: &Doc| None,
        );
        let options = BufferOptions {
            inbound_max_size: 16,
            outbound_max_size: 4,
            outbound_max_lifetime: Duration::from_millis(20),
            export_max_concurrency: 2,
            export_max_retries: 1,
            ..BufferOptions::default()
        };
        Arc::new(BufferedChannel::new(strategy, type_ctx, transport, options))
    }

    #[tokio::test]
    async fn try_write_rejects_before_running() {
        let transport = Arc::new(MockTransport::new());
        let channel = test_channel(transport);
        assert!(!channel.try_write(Doc { value: "x".into() }));
    }

    #[tokio::test]
    async fn bootstrap_resolves_write_target_and_advances_state() {
        let transport = Arc::new(MockTransport::new());
        let channel = test_channel(transport);
        channel.bootstrap().await.unwrap();
        assert_eq!(channel.state(), ChannelState::Bootstrapped);
        assert!(channel.channel_hash().await.is_some());
        assert_eq!(channel.concrete_index().await.as_deref(), Some("logs-test"));
    }

    #[tokio::test]
    async fn full_lifecycle_accepts_writes_and_drains() {
        let transport = Arc::new(MockTransport::new());
        transport.set_response(
            "logs-test/_bulk",
            200,
            Some(json!({
                "took": 1,
                "errors": false,
                "items": [{ "create": { "status": 201 } }],
            })),
        );
        let channel = test_channel(transport.clone());

        channel.bootstrap().await.unwrap();
        channel.start().await.unwrap();
        assert!(channel.try_write(Doc { value: "a".into() }));

        let drained = channel.wait_for_drain(Duration::from_secs(2)).await;
        assert!(drained);
        assert_eq!(channel.state(), ChannelState::Drained);
        assert!(!transport.calls().is_empty());
    }

    #[tokio::test]
    async fn apply_aliases_rejects_before_drain() {
        let transport = Arc::new(MockTransport::new());
        let channel = test_channel(transport);
        channel.bootstrap().await.unwrap();
        assert!(channel.apply_aliases("logs-test").await.is_err());
    }
}
