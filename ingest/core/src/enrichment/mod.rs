//! The AI enrichment orchestrator: keeps a lookup index of
//! LLM-derived fields current and backfills them into a target index via
//! an enrich policy and ingest pipeline.

pub mod lookup;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::bootstrap::{fields_hash_description, needs_fields_hash_update};
use crate::error::{IngestError, IngestResult};
use crate::hash::sha256_hex;
use crate::helpers::pit::PointInTimeSearch;
use crate::helpers::tasks;
use crate::transport::{Method, Transport};

use lookup::{stale_fields_for, staleness_query, EnrichmentField, LookupUpdate};

/// Static configuration for one enrichment loop.
pub struct EnrichmentConfig {
    pub lookup_index: String,
    pub enrich_policy_name: String,
    pub pipeline_name: String,
    pub match_field: String,
    pub inference_endpoint_id: String,
    pub fields: Vec<EnrichmentField>,
    pub max_concurrency: usize,
    pub max_enrichments_per_run: usize,
    pub page_size: usize,
    pub task_poll_interval: Duration,
}

/// `{TotalCandidates, Enriched, Failed, ReachedLimit}`.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResult {
    pub total_candidates: u64,
    pub enriched: u64,
    pub failed: u64,
    pub reached_limit: bool,
}

pub struct AiEnrichmentOrchestrator {
    transport: Arc<dyn Transport>,
    config: EnrichmentConfig,
}

impl AiEnrichmentOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, config: EnrichmentConfig) -> Self {
        Self { transport, config }
    }

    fn fields_hash(&self) -> String {
        let joined: String = self
            .config
            .fields
            .iter()
            .map(|f| f.prompt_hash())
            .collect::<Vec<_>>()
            .join(",");
        sha256_hex(&joined)
    }

    /// Ensures the lookup index, enrich policy, and pipeline exist and are
    /// current.
    pub async fn initialize(&self, lookup_mapping: Value) -> IngestResult<()> {
        self.ensure_lookup_index(lookup_mapping).await?;
        self.ensure_enrich_policy().await?;
        self.ensure_pipeline().await?;
        Ok(())
    }

    async fn ensure_lookup_index(&self, mapping: Value) -> IngestResult<()> {
        let path = self.config.lookup_index.clone();
        let head = self.transport.request(Method::Head, &path, None).await?;
        if head.is_success() {
            return Ok(());
        }
        let body = json!({ "mappings": mapping });
        self.transport.request(Method::Put, &path, Some(body)).await?;
        Ok(())
    }

    /// Replaced when `enrich_fields` no longer equals
    /// `{ai_field_i} ∪ {ai_field_i_ph}`.
    async fn ensure_enrich_policy(&self) -> IngestResult<()> {
        let expected_fields: HashSet<String> = self
            .config
            .fields
            .iter()
            .flat_map(|f| vec![f.ai_field.clone(), f.companion_field()])
            .collect();

        let path = format!("_enrich/policy/{}", self.config.enrich_policy_name);
        let existing = self.transport.request(Method::Get, &path, None).await?;
        let current_fields: Option<HashSet<String>> = existing
            .body
            .as_ref()
            .and_then(|b| b.get("policies"))
            .and_then(Value::as_array)
            .and_then(|policies| policies.first())
            .and_then(|p| p.get("config"))
            .and_then(|c| c.get("match").or_else(|| c.get("geo_match")))
            .and_then(|m| m.get("enrich_fields"))
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect());

        if current_fields.as_ref() == Some(&expected_fields) {
            return Ok(());
        }

        if current_fields.is_some() {
            self.transport.request(Method::Delete, &path, None).await?;
        }

        let body = json!({
            "match": {
                "indices": [self.config.lookup_index.clone()],
                "match_field": self.config.match_field,
                "enrich_fields": expected_fields.into_iter().collect::<Vec<_>>(),
            }
        });
        self.transport.request(Method::Put, &path, Some(body)).await?;

        let execute_path = format!("_enrich/policy/{}/_execute", self.config.enrich_policy_name);
        self.transport.request(Method::Post, &execute_path, None).await?;
        Ok(())
    }

    /// Replaced when the pipeline's `description` doesn't carry the current
    /// `[fields_hash:<v>]` marker.
    async fn ensure_pipeline(&self) -> IngestResult<()> {
        let hash = self.fields_hash();
        let path = format!("_ingest/pipeline/{}", self.config.pipeline_name);
        let existing = self.transport.request(Method::Get, &path, None).await?;
        let current_description = existing
            .body
            .as_ref()
            .and_then(|b| b.get(&self.config.pipeline_name))
            .and_then(|p| p.get("description"))
            .and_then(Value::as_str);

        if !needs_fields_hash_update(current_description, &hash) {
            return Ok(());
        }

        let description = fields_hash_description("ai enrichment pipeline", &hash);
        let body = json!({
            "description": description,
            "processors": [{
                "enrich": {
                    "policy_name": self.config.enrich_policy_name,
                    "field": self.config.match_field,
                    "target_field": "_enrichment",
                }
            }],
        });
        self.transport.request(Method::Put, &path, Some(body)).await?;
        Ok(())
    }

    /// Loop bounded by `MaxEnrichmentsPerRun`.
    pub async fn enrich(&self, target_index: &str) -> IngestResult<EnrichmentResult> {
        let mut result = EnrichmentResult::default();
        let query = staleness_query(&self.config.fields);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut any_progress = false;

        let pit = PointInTimeSearch::open(
            self.transport.as_ref(),
            target_index,
            "1m",
            self.config.page_size.max(1),
        )
        .await?;

        let mut search_after = None;
        loop {
            if result.enriched + result.failed >= self.config.max_enrichments_per_run as u64 {
                result.reached_limit = true;
                break;
            }

            let page = pit
                .next_page(
                    Some(query.clone()),
                    json!(["_doc"]),
                    search_after.clone(),
                    None,
                )
                .await
                .map_err(|err| IngestError::CandidateQueryFailure(err.to_string()))?;

            if page.docs.is_empty() {
                break;
            }
            result.total_candidates += page.docs.len() as u64;

            let mut updates = Vec::new();
            let mut tasks_in_flight = FuturesUnordered::new();
            for doc in &page.docs {
                let source = doc.get("_source").cloned().unwrap_or(Value::Null);
                let stale = stale_fields_for(&self.config.fields, &source);
                if stale.is_empty() {
                    continue;
                }
                let match_value = source
                    .get(&self.config.match_field)
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let Some(match_value) = match_value else {
                    continue;
                };

                let prompt = build_prompt(&stale);
                if prompt.is_empty() {
                    continue;
                }

                let permit = Arc::clone(&semaphore);
                let transport = Arc::clone(&self.transport);
                let endpoint = self.config.inference_endpoint_id.clone();
                let field_names: Vec<String> = stale.iter().map(|f| f.ai_field.clone()).collect();
                let prompt_hashes: Vec<String> = stale.iter().map(|f| f.prompt_hash()).collect();

                tasks_in_flight.push(async move {
                    let _permit = permit.acquire_owned().await;
                    let response = call_inference(transport.as_ref(), &endpoint, &prompt).await;
                    (match_value, field_names, prompt_hashes, response)
                });
            }

            while let Some((match_value, field_names, prompt_hashes, response)) =
                tasks_in_flight.next().await
            {
                match response {
                    Ok(text) => {
                        let mut fields = serde_json::Map::new();
                        for (name, hash) in field_names.iter().zip(prompt_hashes.iter()) {
                            fields.insert(name.clone(), json!(text));
                            fields.insert(format!("{name}_ph"), json!(hash));
                        }
                        updates.push(LookupUpdate::for_match_value(
                            &match_value,
                            Value::Object(fields),
                            Utc::now(),
                        ));
                        result.enriched += 1;
                    }
                    Err(err) => {
                        warn!("enrichment inference call failed: {err}");
                        result.failed += 1;
                    }
                }
            }

            if !updates.is_empty() {
                self.bulk_upsert(&updates).await?;
                any_progress = true;
            }

            search_after = page.next_search_after;
            if !page.has_more {
                break;
            }
        }

        pit.dispose().await?;

        if any_progress {
            let execute_path = format!("_enrich/policy/{}/_execute", self.config.enrich_policy_name);
            self.transport.request(Method::Post, &execute_path, None).await?;

            tasks::update_by_query(
                self.transport.as_ref(),
                target_index,
                query,
                Some(&self.config.pipeline_name),
                self.config.task_poll_interval,
            )
            .await?;
        }

        info!(
            "enrichment run complete: {} candidates, {} enriched, {} failed",
            result.total_candidates, result.enriched, result.failed
        );
        Ok(result)
    }

    async fn bulk_upsert(&self, updates: &[LookupUpdate]) -> IngestResult<()> {
        let mut body = String::new();
        for update in updates {
            body.push_str(&json!({ "update": { "_id": update.id } }).to_string());
            body.push('\n');
            body.push_str(&json!({ "doc": update.doc, "doc_as_upsert": true }).to_string());
            body.push('\n');
        }
        let path = format!("{}/_bulk", self.config.lookup_index);
        let response = self
            .transport
            .request_raw(Method::Post, &path, body, "application/x-ndjson")
            .await
            .map_err(|err| IngestError::LookupUpsertError(err.to_string()))?;
        if !response.is_success() {
            return Err(IngestError::LookupUpsertError(format!(
                "status {}",
                response.status
            )));
        }
        Ok(())
    }

    /// `created_at < now - max_age`.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> IngestResult<()> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let query = json!({
            "range": { "created_at": { "lt": cutoff.to_rfc3339() } }
        });
        tasks::delete_by_query(
            self.transport.as_ref(),
            &self.config.lookup_index,
            query,
            self.config.task_poll_interval,
        )
        .await?;
        Ok(())
    }

    /// PIT-scans the lookup in pages of ~1000; deletes lookup entries whose
    /// match value no longer appears in `target_index`.
    pub async fn cleanup_orphaned(&self, target_index: &str) -> IngestResult<()> {
        let pit = PointInTimeSearch::open(self.transport.as_ref(), &self.config.lookup_index, "1m", 1000)
            .await?;
        let mut search_after = None;
        loop {
            let page = pit
                .next_page(None, json!(["_doc"]), search_after.clone(), None)
                .await?;
            if page.docs.is_empty() {
                break;
            }

            let match_values: Vec<String> = page
                .docs
                .iter()
                .filter_map(|d| {
                    d.get("_source")
                        .and_then(|s| s.get(&self.config.match_field))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .collect();

            let present_query = json!({
                "terms": { self.config.match_field.clone(): match_values.clone() }
            });
            let response = self
                .transport
                .request(
                    Method::Post,
                    &format!("{target_index}/_search?collapse_field={}", self.config.match_field),
                    Some(json!({
                        "size": match_values.len(),
                        "query": present_query,
                        "collapse": { "field": self.config.match_field },
                        "_source": false,
                    })),
                )
                .await?;
            let present: HashSet<String> = response
                .body
                .as_ref()
                .and_then(|b| b.get("hits"))
                .and_then(|h| h.get("hits"))
                .and_then(Value::as_array)
                .map(|hits| {
                    hits.iter()
                        .filter_map(|hit| hit.get("fields").and_then(|f| f.get(&self.config.match_field)))
                        .filter_map(Value::as_array)
                        .filter_map(|arr| arr.first())
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            let orphaned: Vec<&String> = match_values.iter().filter(|v| !present.contains(*v)).collect();
            if !orphaned.is_empty() {
                let ids: Vec<String> = orphaned.iter().map(|v| sha256_hex(v)).collect();
                let query = json!({ "ids": { "values": ids } });
                tasks::delete_by_query(
                    self.transport.as_ref(),
                    &self.config.lookup_index,
                    query,
                    self.config.task_poll_interval,
                )
                .await?;
            }

            search_after = page.next_search_after;
            if !page.has_more {
                break;
            }
        }
        pit.dispose().await?;
        Ok(())
    }

    /// `match_all` delete-by-query.
    pub async fn purge(&self) -> IngestResult<()> {
        tasks::delete_by_query(
            self.transport.as_ref(),
            &self.config.lookup_index,
            json!({ "match_all": {} }),
            self.config.task_poll_interval,
        )
        .await?;
        Ok(())
    }
}

fn build_prompt(stale: &[&EnrichmentField]) -> String {
    stale
        .iter()
        .map(|f| f.description.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// `POST _inference/completion/{endpointId}` with body `{"input": "..."}`;
/// response `{"completion":[{"result": "..."}]}`.
async fn call_inference(transport: &dyn Transport, endpoint_id: &str, prompt: &str) -> IngestResult<String> {
    let path = format!("_inference/completion/{endpoint_id}");
    let response = transport
        .request(Method::Post, &path, Some(json!({ "input": prompt })))
        .await
        .map_err(|err| IngestError::InferenceFailure(err.to_string()))?;
    if !response.is_success() {
        return Err(IngestError::InferenceFailure(format!(
            "status {}",
            response.status
        )));
    }
    response
        .body
        .as_ref()
        .and_then(|b| b.get("completion"))
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|entry| entry.get("result"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| IngestError::InferenceFailure("unparseable inference response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn config() -> EnrichmentConfig {
        EnrichmentConfig {
            lookup_index: "lookup-summaries".to_string(),
            enrich_policy_name: "summaries-policy".to_string(),
            pipeline_name: "summaries-pipeline".to_string(),
            match_field: "url".to_string(),
            inference_endpoint_id: "summary-endpoint".to_string(),
            fields: vec![EnrichmentField {
                ai_field: "summary".to_string(),
                description: "summarize the page".to_string(),
            }],
            max_concurrency: 2,
            max_enrichments_per_run: 10,
            page_size: 100,
            task_poll_interval: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn ensure_lookup_index_skips_put_when_index_already_exists() {
        let transport = Arc::new(MockTransport::with_default_status(200));
        let orchestrator = AiEnrichmentOrchestrator::new(transport.clone(), config());
        orchestrator.ensure_lookup_index(json!({})).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Head);
    }

    #[tokio::test]
    async fn ensure_lookup_index_creates_when_missing() {
        let transport = Arc::new(MockTransport::new());
        transport.set_response("lookup-summaries", 404, None);
        let orchestrator = AiEnrichmentOrchestrator::new(transport.clone(), config());
        orchestrator.ensure_lookup_index(json!({})).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, Method::Head);
        assert_eq!(calls[1].method, Method::Put);
    }

    #[tokio::test]
    async fn call_inference_parses_completion_result() {
        let transport = MockTransport::new();
        transport.queue_response(
            200,
            Some(json!({ "completion": [{ "result": "a summary" }] })),
        );
        let text = call_inference(&transport, "summary-endpoint", "summarize this")
            .await
            .unwrap();
        assert_eq!(text, "a summary");
    }

    #[tokio::test]
    async fn call_inference_reports_failure_on_unparseable_body() {
        let transport = MockTransport::new();
        transport.queue_response(200, Some(json!({ "unexpected": true })));
        let result = call_inference(&transport, "summary-endpoint", "x").await;
        assert!(matches!(result, Err(IngestError::InferenceFailure(_))));
    }

    #[test]
    fn fields_hash_is_stable_for_same_field_set() {
        let orchestrator = AiEnrichmentOrchestrator::new(Arc::new(MockTransport::new()), config());
        let other = AiEnrichmentOrchestrator::new(Arc::new(MockTransport::new()), config());
        assert_eq!(orchestrator.fields_hash(), other.fields_hash());
    }

    #[test]
    fn build_prompt_joins_stale_field_descriptions() {
        let field = EnrichmentField {
            ai_field: "summary".to_string(),
            description: "summarize the page".to_string(),
        };
        let prompt = build_prompt(&[&field]);
        assert_eq!(prompt, "summarize the page");
    }
}
