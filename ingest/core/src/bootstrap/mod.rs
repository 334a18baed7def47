//! The bootstrap engine: an ordered, idempotent step runner.

mod steps;

pub use steps::{
    fields_hash_description, needs_fields_hash_update, ComponentTemplateStep,
    DataStreamLifecycleStep, DataStreamTemplateStep, IlmPolicyStep, IndexTemplateStep,
    InferenceEndpointStep, NoopStep,
};

use async_trait::async_trait;
use log::{error, warn};

use crate::error::{IngestError, IngestResult};
use crate::transport::Transport;

/// How step failures propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapMethod {
    /// Failures are swallowed; subsequent steps still run.
    Silent,
    /// The first failing step aborts bootstrap and surfaces the error.
    Failure,
}

/// Mutable bag passed between bootstrap steps.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub bootstrap_method: BootstrapMethod,
    pub template_name: String,
    pub template_wildcard: String,
    pub mappings_json: serde_json::Value,
    pub settings_json: serde_json::Value,
    pub data_stream_type: Option<String>,
    pub retention: Option<String>,

    /// Set by `ComponentTemplateStep`; read by every later step that needs
    /// to tag its resource with the current channel hash.
    pub channel_hash: Option<String>,
    /// Detected lazily the first time a step needs to branch on it.
    pub is_serverless: Option<bool>,
    /// Recorded by `DataStreamLifecycleStep` for `IndexTemplateStep`/
    /// `DataStreamTemplateStep` to consume.
    pub data_stream_lifecycle_retention: Option<String>,
    /// Set by `ComponentTemplateStep`: true when both component templates
    /// already carried the current hash and neither required a write.
    pub templates_already_matched: bool,
}

impl BootstrapContext {
    pub fn new(
        bootstrap_method: BootstrapMethod,
        template_name: impl Into<String>,
        mappings_json: serde_json::Value,
        settings_json: serde_json::Value,
    ) -> Self {
        let template_name = template_name.into();
        let template_wildcard = format!("{template_name}-*");
        Self {
            bootstrap_method,
            template_name,
            template_wildcard,
            mappings_json,
            settings_json,
            data_stream_type: None,
            retention: None,
            channel_hash: None,
            is_serverless: None,
            data_stream_lifecycle_retention: None,
            templates_already_matched: false,
        }
    }
}

/// One ordered, idempotent bootstrap step.
#[async_trait]
pub trait BootstrapStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()>;
}

/// Runs `steps` in order against `context`, honoring `BootstrapMethod`.
pub struct BootstrapEngine;

impl BootstrapEngine {
    pub async fn run(
        steps: &[Box<dyn BootstrapStep>],
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        for step in steps {
            match step.run(transport, context).await {
                Ok(()) => {}
                Err(err) => match context.bootstrap_method {
                    BootstrapMethod::Failure => {
                        return Err(IngestError::StepFailure {
                            step: step.name().to_string(),
                            message: err.to_string(),
                        });
                    }
                    BootstrapMethod::Silent => {
                        warn!("bootstrap step {} failed (silent mode): {err}", step.name());
                        error!("{err}");
                    }
                },
            }
        }
        Ok(())
    }
}
