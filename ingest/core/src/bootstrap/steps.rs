//! The step catalog.

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};

use super::{BootstrapContext, BootstrapStep};
use crate::error::{IngestError, IngestResult};
use crate::hash::{channel_hash, extract_hash_marker, hash_marker};
use crate::transport::{Method, Transport};

async fn current_meta_hash(
    transport: &dyn Transport,
    get_path: &str,
    doc_key: &str,
) -> IngestResult<Option<String>> {
    let response = transport.request(Method::Get, get_path, None).await?;
    if !response.is_success() {
        return Ok(None);
    }
    let hash = response
        .body
        .as_ref()
        .and_then(|b| b.get(doc_key))
        .and_then(|d| d.get("_meta"))
        .and_then(|m| m.get("hash"))
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(hash)
}

/// `PUT _ilm/policy/{name}` unless the current policy's embedded
/// `[hash:...]` matches.
pub struct IlmPolicyStep {
    pub name: String,
    pub hot_max_age: Option<String>,
    pub delete_min_age: Option<String>,
}

#[async_trait]
impl BootstrapStep for IlmPolicyStep {
    fn name(&self) -> &'static str {
        "ilm_policy"
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        let policy = self.build_policy();
        let hash = channel_hash(&policy.to_string(), "", "ilm");

        let path = format!("_ilm/policy/{}", self.name);
        let existing = transport.request(Method::Get, &path, None).await?;
        let existing_hash = existing
            .body
            .as_ref()
            .and_then(|b| b.get(&self.name))
            .and_then(|p| p.get("policy"))
            .and_then(|p| p.get("_meta"))
            .and_then(|m| m.get("hash"))
            .and_then(Value::as_str);

        if existing_hash == Some(hash.as_str()) {
            debug!("ilm policy {} already up to date", self.name);
            return Ok(());
        }

        let body = json!({
            "policy": {
                "_meta": { "hash": hash },
                "phases": policy,
            }
        });
        let response = transport
            .request(Method::Put, &path, Some(body))
            .await?;
        if !response.is_success() {
            return Err(IngestError::StepFailure {
                step: self.name().to_string(),
                message: format!("status {}", response.status),
            });
        }
        info!("created/updated ilm policy {}", self.name);
        Ok(())
    }
}

impl IlmPolicyStep {
    fn build_policy(&self) -> Value {
        let mut phases = serde_json::Map::new();
        phases.insert(
            "hot".to_string(),
            json!({
                "min_age": "0ms",
                "actions": self.hot_max_age.as_ref().map(|age| json!({
                    "rollover": { "max_age": age }
                })).unwrap_or(json!({})),
            }),
        );
        if let Some(delete_min_age) = &self.delete_min_age {
            phases.insert(
                "delete".to_string(),
                json!({ "min_age": delete_min_age, "actions": { "delete": {} } }),
            );
        }
        Value::Object(phases)
    }
}

/// Writes `{templateName}-mappings` and `{templateName}-settings`; sets
/// `BootstrapContext.channel_hash`.
pub struct ComponentTemplateStep {
    pub ilm_policy_name: Option<String>,
}

#[async_trait]
impl BootstrapStep for ComponentTemplateStep {
    fn name(&self) -> &'static str {
        "component_template"
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        let mappings_str = context.mappings_json.to_string();
        let settings_str = context.settings_json.to_string();
        let salt = self.ilm_policy_name.clone().unwrap_or_default();
        let hash = channel_hash(&mappings_str, &settings_str, &salt);
        context.channel_hash = Some(hash.clone());

        let mappings_name = format!("{}-mappings", context.template_name);
        let current = current_meta_hash(
            transport,
            &format!("_component_template/{mappings_name}"),
            "component_templates",
        )
        .await?;
        let mappings_matched = current.as_deref() == Some(hash.as_str());
        if !mappings_matched {
            let body = json!({
                "template": { "mappings": context.mappings_json },
                "_meta": { "hash": hash },
            });
            let response = transport
                .request(
                    Method::Put,
                    &format!("_component_template/{mappings_name}"),
                    Some(body),
                )
                .await?;
            if !response.is_success() {
                return Err(IngestError::StepFailure {
                    step: self.name().to_string(),
                    message: format!("mappings template status {}", response.status),
                });
            }
        }

        let settings_name = format!("{}-settings", context.template_name);
        let mut settings = context.settings_json.clone();
        if let Some(ilm_policy_name) = &self.ilm_policy_name {
            if let Value::Object(map) = &mut settings {
                map.insert(
                    "index.lifecycle.name".to_string(),
                    json!(ilm_policy_name),
                );
            }
        }
        let current = current_meta_hash(
            transport,
            &format!("_component_template/{settings_name}"),
            "component_templates",
        )
        .await?;
        let settings_matched = current.as_deref() == Some(hash.as_str());
        if !settings_matched {
            let body = json!({
                "template": { "settings": settings },
                "_meta": { "hash": hash },
            });
            let response = transport
                .request(
                    Method::Put,
                    &format!("_component_template/{settings_name}"),
                    Some(body),
                )
                .await?;
            if !response.is_success() {
                return Err(IngestError::StepFailure {
                    step: self.name().to_string(),
                    message: format!("settings template status {}", response.status),
                });
            }
        }

        context.templates_already_matched = mappings_matched && settings_matched;
        info!("component templates for {} up to date", context.template_name);
        Ok(())
    }
}

/// Records the lifecycle retention in the context for later steps.
pub struct DataStreamLifecycleStep {
    pub retention: String,
}

#[async_trait]
impl BootstrapStep for DataStreamLifecycleStep {
    fn name(&self) -> &'static str {
        "data_stream_lifecycle"
    }

    async fn run(
        &self,
        _transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        context.data_stream_lifecycle_retention = Some(self.retention.clone());
        Ok(())
    }
}

/// Creates a composable index template (non-data-stream target).
pub struct IndexTemplateStep;

#[async_trait]
impl BootstrapStep for IndexTemplateStep {
    fn name(&self) -> &'static str {
        "index_template"
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        let hash = context.channel_hash.clone().unwrap_or_default();
        let body = json!({
            "index_patterns": [context.template_wildcard.clone()],
            "composed_of": [
                format!("{}-mappings", context.template_name),
                format!("{}-settings", context.template_name),
            ],
            "_meta": { "hash": hash, "assembly_version": 1 },
        });
        let path = format!("_index_template/{}", context.template_name);
        let response = transport.request(Method::Put, &path, Some(body)).await?;
        if !response.is_success() {
            return Err(IngestError::StepFailure {
                step: self.name().to_string(),
                message: format!("status {}", response.status),
            });
        }
        info!("index template {} created/updated", context.template_name);
        Ok(())
    }
}

/// Creates the composable template for a data stream, including
/// `"data_stream": {}` and references to built-in component templates.
pub struct DataStreamTemplateStep;

#[async_trait]
impl BootstrapStep for DataStreamTemplateStep {
    fn name(&self) -> &'static str {
        "data_stream_template"
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        let hash = context.channel_hash.clone().unwrap_or_default();
        let mut composed_of = vec![
            format!("{}-mappings", context.template_name),
            format!("{}-settings", context.template_name),
            "data-streams-mappings".to_string(),
        ];
        if let Some(ds_type) = &context.data_stream_type {
            if ds_type == "logs" {
                composed_of.push("logs-mappings".to_string());
                composed_of.push("logs-settings".to_string());
            } else if ds_type == "metrics" {
                composed_of.push("metrics-mappings".to_string());
                composed_of.push("metrics-settings".to_string());
            }
        }

        let mut template = json!({
            "index_patterns": [context.template_wildcard.clone()],
            "data_stream": {},
            "composed_of": composed_of,
            "_meta": { "hash": hash, "assembly_version": 1 },
        });
        if let Some(retention) = &context.data_stream_lifecycle_retention {
            template["template"] = json!({
                "lifecycle": { "data_retention": retention }
            });
        }

        let path = format!("_index_template/{}", context.template_name);
        let response = transport
            .request(Method::Put, &path, Some(template))
            .await?;
        if !response.is_success() {
            return Err(IngestError::StepFailure {
                step: self.name().to_string(),
                message: format!("status {}", response.status),
            });
        }
        info!(
            "data stream template {} created/updated",
            context.template_name
        );
        Ok(())
    }
}

/// Creates or asserts existence of an inference endpoint.
pub struct InferenceEndpointStep {
    pub inference_id: String,
    pub num_threads: u32,
    pub use_preexisting: bool,
    pub timeout_seconds: Option<u64>,
}

#[async_trait]
impl BootstrapStep for InferenceEndpointStep {
    fn name(&self) -> &'static str {
        "inference_endpoint"
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        _context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        let path = format!("_inference/completion/{}", self.inference_id);
        if self.use_preexisting {
            let existing = transport.request(Method::Get, &path, None).await?;
            if existing.is_success() {
                debug!("inference endpoint {} already exists", self.inference_id);
                return Ok(());
            }
        }

        let body = json!({
            "service_settings": {
                "num_threads": self.num_threads,
            },
            "timeout": self.timeout_seconds.map(|s| format!("{s}s")),
        });
        let response = transport.request(Method::Put, &path, Some(body)).await?;
        if !response.is_success() {
            return Err(IngestError::StepFailure {
                step: self.name().to_string(),
                message: format!("status {}", response.status),
            });
        }
        info!("created inference endpoint {}", self.inference_id);
        Ok(())
    }
}

/// Used by wired streams, whose bootstrap is performed by Elasticsearch
/// itself.
pub struct NoopStep;

#[async_trait]
impl BootstrapStep for NoopStep {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn run(
        &self,
        _transport: &dyn Transport,
        _context: &mut BootstrapContext,
    ) -> IngestResult<()> {
        Ok(())
    }
}

/// Helper used by pipeline/enrich-policy bootstrap outside this module:
/// replace a `[fields_hash:<v>]`-tagged description only when the hash
/// changed.
pub fn needs_fields_hash_update(current_description: Option<&str>, current_hash: &str) -> bool {
    match current_description.and_then(|d| extract_hash_marker(d, "fields_hash")) {
        Some(existing) => existing != current_hash,
        None => true,
    }
}

pub fn fields_hash_description(prefix: &str, hash: &str) -> String {
    format!("{prefix} {}", hash_marker("fields_hash", hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_hash_update_detection() {
        assert!(needs_fields_hash_update(None, "abc"));
        assert!(needs_fields_hash_update(
            Some("enrich policy [fields_hash:old]"),
            "new"
        ));
        assert!(!needs_fields_hash_update(
            Some("enrich policy [fields_hash:same]"),
            "same"
        ));
    }
}
