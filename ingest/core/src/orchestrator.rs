//! Incremental sync orchestrator: coordinates a primary and a
//! secondary buffered channel through bootstrap, writes, and a drain-then-
//! reconcile completion.

use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::buffer::BufferedChannel;
use crate::bootstrap::BootstrapMethod;
use crate::error::{IngestError, IngestResult};
use crate::helpers::tasks;
use crate::transport::{Method, Transport};

/// Chosen once per `StartAsync` call and fixed for the orchestrator's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Only the primary is armed for writes; secondary is caught up via a
    /// server-side reindex at completion.
    Reindex,
    /// Both channels are armed; every write is duplicated.
    Multiplex,
}

/// A task run once before bootstrap begins.
#[async_trait::async_trait]
pub trait PreBootstrapTask: Send + Sync {
    async fn run(&self, transport: &dyn Transport) -> IngestResult<()>;
}

/// A hook invoked once `complete()` has resolved the final strategy and
/// applied aliases, with the outcome that will be returned to the caller.
#[async_trait::async_trait]
pub trait PostCompleteHook: Send + Sync {
    async fn run(&self, outcome: &CompletionOutcome);
}

/// Outcome of `CompleteAsync`.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub strategy: SyncStrategy,
    pub batch_timestamp: chrono::DateTime<chrono::Utc>,
}

pub struct IncrementalSyncOrchestrator<D> {
    primary: Arc<BufferedChannel<D>>,
    secondary: Arc<BufferedChannel<D>>,
    transport: Arc<dyn Transport>,
    pre_bootstrap_tasks: Vec<Box<dyn PreBootstrapTask>>,
    post_complete_hooks: Vec<Box<dyn PostCompleteHook>>,
    poll_interval: Duration,
    strategy: std::sync::Mutex<Option<SyncStrategy>>,
    retained_generations: usize,
}

impl<D> IncrementalSyncOrchestrator<D>
where
    D: Serialize + Clone + Send + Sync + 'static,
{
    pub fn new(
        primary: Arc<BufferedChannel<D>>,
        secondary: Arc<BufferedChannel<D>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            primary,
            secondary,
            transport,
            pre_bootstrap_tasks: Vec::new(),
            post_complete_hooks: Vec::new(),
            poll_interval: Duration::from_millis(500),
            strategy: std::sync::Mutex::new(None),
            retained_generations: 1,
        }
    }

    pub fn with_pre_bootstrap_tasks(mut self, tasks: Vec<Box<dyn PreBootstrapTask>>) -> Self {
        self.pre_bootstrap_tasks = tasks;
        self
    }

    pub fn with_post_complete_hooks(mut self, hooks: Vec<Box<dyn PostCompleteHook>>) -> Self {
        self.post_complete_hooks = hooks;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Bootstraps both channels, decides `SyncStrategy`, arms the channels
    /// for writes, and starts their pipelines.
    pub async fn start(&self, _bootstrap_method: BootstrapMethod) -> IngestResult<SyncStrategy> {
        for task in &self.pre_bootstrap_tasks {
            task.run(self.transport.as_ref()).await?;
        }

        self.primary.bootstrap().await?;
        self.secondary.bootstrap().await?;

        let strategy = self.decide_strategy().await?;
        *self.strategy.lock().unwrap() = Some(strategy);

        self.primary.start().await?;
        if strategy == SyncStrategy::Multiplex {
            self.secondary.start().await?;
        }

        info!("incremental sync orchestrator armed with strategy {strategy:?}");
        Ok(strategy)
    }

    async fn decide_strategy(&self) -> IngestResult<SyncStrategy> {
        let templates_matched =
            self.primary.templates_already_matched() && self.secondary.templates_already_matched();

        let secondary_hash_changed = match (
            self.secondary.channel_hash().await,
            self.last_secondary_owned_hash().await?,
        ) {
            (Some(current), Some(recorded)) => current != recorded,
            _ => false,
        };

        if secondary_hash_changed {
            // Reindexing would copy documents serialized under the old
            // schema.
            return Ok(SyncStrategy::Multiplex);
        }

        if !templates_matched {
            return Ok(SyncStrategy::Multiplex);
        }

        let secondary_alias_live = match self.secondary.write_alias() {
            Some(alias) => self.alias_resolves_to_live_index(alias).await?,
            None => false,
        };

        if secondary_alias_live {
            Ok(SyncStrategy::Reindex)
        } else {
            Ok(SyncStrategy::Multiplex)
        }
    }

    async fn last_secondary_owned_hash(&self) -> IngestResult<Option<String>> {
        let Some(index) = self.secondary.concrete_index().await else {
            return Ok(None);
        };
        let path = format!("{index}");
        let response = self.transport.request(Method::Get, &path, None).await?;
        if !response.is_success() {
            return Ok(None);
        }
        let hash = response
            .body
            .as_ref()
            .and_then(|b| b.as_object())
            .and_then(|obj| obj.values().next())
            .and_then(|entry| entry.get("mappings"))
            .and_then(|m| m.get("_meta"))
            .and_then(|m| m.get("hash"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(hash)
    }

    async fn alias_resolves_to_live_index(&self, alias: &str) -> IngestResult<bool> {
        let path = format!("_alias/{alias}");
        let response = self.transport.request(Method::Get, &path, None).await?;
        Ok(response.is_success()
            && response
                .body
                .as_ref()
                .and_then(Value::as_object)
                .map(|obj| !obj.is_empty())
                .unwrap_or(false))
    }

    /// Writes to the armed channel(s); in multiplex both must succeed or
    /// the call reports `MultiplexPartialPublish`.
    pub fn try_write(&self, doc: D) -> IngestResult<()> {
        let strategy = self
            .strategy
            .lock()
            .unwrap()
            .ok_or_else(|| IngestError::Internal("orchestrator not started".into()))?;

        match strategy {
            SyncStrategy::Reindex => {
                if self.primary.try_write(doc) {
                    Ok(())
                } else {
                    Err(IngestError::InboundFull)
                }
            }
            SyncStrategy::Multiplex => {
                let primary_ok = self.primary.try_write(doc.clone());
                let secondary_ok = self.secondary.try_write(doc);
                if primary_ok && secondary_ok {
                    Ok(())
                } else if !primary_ok && !secondary_ok {
                    Err(IngestError::InboundFull)
                } else {
                    warn!("multiplex write only partially accepted");
                    Err(IngestError::MultiplexPartialPublish)
                }
            }
        }
    }

    /// Drains both armed channels, reconciles the secondary (reindex or
    /// already-current via multiplex), applies aliases, retires superseded
    /// generations, and invokes `on_post_complete` with the resolved
    /// strategy and batch timestamp.
    pub async fn complete(&self, drain_max_wait: Duration) -> IngestResult<CompletionOutcome> {
        let strategy = self
            .strategy
            .lock()
            .unwrap()
            .ok_or_else(|| IngestError::Internal("orchestrator not started".into()))?;
        let batch_timestamp = chrono::Utc::now();

        if !self.primary.wait_for_drain(drain_max_wait).await {
            return Err(IngestError::PrimaryDrainTimeout);
        }
        if strategy == SyncStrategy::Multiplex
            && !self.secondary.wait_for_drain(drain_max_wait).await
        {
            return Err(IngestError::PrimaryDrainTimeout);
        }

        let primary_index = self
            .primary
            .concrete_index()
            .await
            .ok_or_else(|| IngestError::Internal("primary has no concrete index".into()))?;
        self.refresh(&primary_index).await?;

        if strategy == SyncStrategy::Reindex {
            let secondary_index = self
                .secondary
                .concrete_index()
                .await
                .ok_or_else(|| IngestError::Internal("secondary has no concrete index".into()))?;
            tasks::server_reindex(
                self.transport.as_ref(),
                &primary_index,
                &secondary_index,
                self.poll_interval,
            )
            .await?;
            self.refresh(&secondary_index).await?;
        }

        if let Some(index) = self.primary.concrete_index().await {
            self.primary.apply_aliases(&index).await?;
        }
        if strategy == SyncStrategy::Multiplex || strategy == SyncStrategy::Reindex {
            if let Some(index) = self.secondary.concrete_index().await {
                self.secondary.apply_aliases(&index).await?;
            }
        }

        self.retire_superseded_indices().await?;

        let outcome = CompletionOutcome {
            strategy,
            batch_timestamp,
        };
        for hook in &self.post_complete_hooks {
            hook.run(&outcome).await;
        }
        Ok(outcome)
    }

    async fn refresh(&self, index: &str) -> IngestResult<()> {
        let path = format!("{index}/_refresh");
        self.transport.request(Method::Post, &path, None).await?;
        Ok(())
    }

    /// Deletes dated indices matching the write-target pattern that are
    /// neither the current concrete index nor among the `retained_generations`
    /// most-recent.
    async fn retire_superseded_indices(&self) -> IngestResult<()> {
        for channel in [&self.primary, &self.secondary] {
            let Some(current) = channel.concrete_index().await else {
                continue;
            };
            let write_target = &channel.type_ctx().write_target;
            let wildcard = format!("{write_target}-*");
            let path = format!("_resolve/index/{wildcard}");
            let response = self.transport.request(Method::Get, &path, None).await?;
            let Some(indices) = response
                .body
                .as_ref()
                .and_then(|b| b.get("indices"))
                .and_then(Value::as_array)
            else {
                continue;
            };

            let mut names: Vec<String> = indices
                .iter()
                .filter_map(|entry| entry.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .filter(|name| name != &current)
                .collect();
            names.sort();
            names.reverse();

            for stale in names.into_iter().skip(self.retained_generations) {
                let delete_path = stale.clone();
                if let Err(err) = self.transport.request(Method::Delete, &delete_path, None).await {
                    warn!("failed to delete superseded index {stale}: {err}");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapContext;
    use crate::buffer::BufferOptions;
    use crate::strategy::alias::NoAlias;
    use crate::strategy::document_ingest::DataStreamIngest;
    use crate::strategy::provisioning::AlwaysCreate;
    use crate::testing::MockTransport;
    use crate::types::{EntityTarget, TypeContext};
    use crate::IngestStrategy;
    use serde::Serialize;
    use serde_json::json;

    #[derive(Serialize, Clone)]
    struct Doc {
        value: String,
    }

    /// A bootstrap step that pins `channel_hash`/`templates_already_matched`
    /// without touching the transport, so orchestrator tests can control the
    /// mode-selection inputs directly.
    struct FakeMatchedStep {
        hash: &'static str,
        matched: bool,
    }

    #[async_trait::async_trait]
    impl crate::bootstrap::BootstrapStep for FakeMatchedStep {
        fn name(&self) -> &'static str {
            "fake_matched"
        }

        async fn run(
            &self,
            _transport: &dyn Transport,
            context: &mut BootstrapContext,
        ) -> IngestResult<()> {
            context.channel_hash = Some(self.hash.to_string());
            context.templates_already_matched = self.matched;
            Ok(())
        }
    }

    fn channel_with_match(
        write_target: &str,
        hash: &'static str,
        matched: bool,
        transport: Arc<dyn Transport>,
    ) -> Arc<BufferedChannel<Doc>> {
        let strategy = IngestStrategy::new(
            Box::new(DataStreamIngest),
            Arc::new(AlwaysCreate),
            Arc::new(NoAlias),
        )
        .with_bootstrap_steps(vec![Box::new(FakeMatchedStep { hash, matched })]);
        let type_ctx = TypeContext::new(
            EntityTarget::DataStream,
            write_target.to_string(),
            || json!({}),
            || json!({}),
            |_: &Doc| None,
            |_: &Doc| None,
            |_: &Doc| None,
        )
        .with_aliases(Some(format!("{write_target}-write")), None::<String>);
        Arc::new(BufferedChannel::new(
            strategy,
            type_ctx,
            transport,
            BufferOptions::default(),
        ))
    }

    #[tokio::test]
    async fn decide_strategy_multiplexes_when_templates_never_matched() {
        let transport = Arc::new(MockTransport::new());
        let primary = channel_with_match("logs-primary", "h1", false, transport.clone());
        let secondary = channel_with_match("logs-secondary", "h1", false, transport.clone());

        let orchestrator =
            IncrementalSyncOrchestrator::new(primary, secondary, transport as Arc<dyn Transport>);
        let strategy = orchestrator.start(BootstrapMethod::Failure).await.unwrap();
        assert_eq!(strategy, SyncStrategy::Multiplex);
    }

    #[tokio::test]
    async fn decide_strategy_reindexes_when_matched_and_alias_live() {
        let transport = Arc::new(MockTransport::new());
        // last_secondary_owned_hash: GET on the secondary's concrete index.
        transport.set_response(
            "logs-secondary",
            200,
            Some(json!({
                "logs-secondary": { "mappings": { "_meta": { "hash": "h1" } } }
            })),
        );
        // alias_resolves_to_live_index: GET on the secondary's write alias.
        transport.set_response(
            "_alias/logs-secondary-write",
            200,
            Some(json!({ "logs-secondary": {} })),
        );

        let primary = channel_with_match("logs-primary", "h1", true, transport.clone());
        let secondary_ctx_transport = transport.clone();
        let secondary = channel_with_match("logs-secondary", "h1", true, secondary_ctx_transport);

        let orchestrator =
            IncrementalSyncOrchestrator::new(primary, secondary, transport as Arc<dyn Transport>);
        let strategy = orchestrator.start(BootstrapMethod::Failure).await.unwrap();
        assert_eq!(strategy, SyncStrategy::Reindex);
    }

    struct RecordingHook(Arc<std::sync::Mutex<Option<SyncStrategy>>>);

    #[async_trait::async_trait]
    impl PostCompleteHook for RecordingHook {
        async fn run(&self, outcome: &CompletionOutcome) {
            *self.0.lock().unwrap() = Some(outcome.strategy);
        }
    }

    #[tokio::test]
    async fn complete_invokes_post_complete_hook_with_resolved_outcome() {
        let transport = Arc::new(MockTransport::new());
        let primary = channel_with_match("logs-primary", "h1", false, transport.clone());
        let secondary = channel_with_match("logs-secondary", "h1", false, transport.clone());
        let seen = Arc::new(std::sync::Mutex::new(None));

        let orchestrator =
            IncrementalSyncOrchestrator::new(primary, secondary, transport as Arc<dyn Transport>)
                .with_post_complete_hooks(vec![Box::new(RecordingHook(seen.clone()))]);
        let strategy = orchestrator.start(BootstrapMethod::Failure).await.unwrap();

        let outcome = orchestrator.complete(Duration::from_secs(2)).await.unwrap();
        assert_eq!(outcome.strategy, strategy);
        assert_eq!(*seen.lock().unwrap(), Some(strategy));
    }

    #[tokio::test]
    async fn try_write_before_start_is_an_internal_error() {
        let transport = Arc::new(MockTransport::new());
        let primary = channel_with_match("logs-primary", "h1", false, transport.clone());
        let secondary = channel_with_match("logs-secondary", "h1", false, transport.clone());
        let orchestrator =
            IncrementalSyncOrchestrator::new(primary, secondary, transport as Arc<dyn Transport>);
        assert!(orchestrator.try_write(Doc { value: "x".into() }).is_err());
    }
}
