//! Alias strategies: applied once per channel, after drain.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{IngestError, IngestResult};
use crate::transport::{Method, Transport};

#[async_trait]
pub trait AliasStrategy: Send + Sync {
    async fn apply(
        &self,
        transport: &dyn Transport,
        concrete_index: &str,
        write_alias: Option<&str>,
        read_alias: Option<&str>,
    ) -> IngestResult<()>;
}

pub struct NoAlias;

#[async_trait]
impl AliasStrategy for NoAlias {
    async fn apply(
        &self,
        _transport: &dyn Transport,
        _concrete_index: &str,
        _write_alias: Option<&str>,
        _read_alias: Option<&str>,
    ) -> IngestResult<()> {
        Ok(())
    }
}

/// Points `"{base}-latest"` and `ReadAlias` at the current concrete index,
/// in a single `/_aliases` call that adds the new assignment and removes
/// any prior assignment for the same alias.
pub struct LatestAndSearch {
    pub base: String,
}

#[async_trait]
impl AliasStrategy for LatestAndSearch {
    async fn apply(
        &self,
        transport: &dyn Transport,
        concrete_index: &str,
        write_alias: Option<&str>,
        read_alias: Option<&str>,
    ) -> IngestResult<()> {
        let latest_alias = format!("{}-latest", self.base);
        let mut aliases: Vec<String> = vec![latest_alias];
        aliases.extend(write_alias.map(str::to_string));
        aliases.extend(read_alias.map(str::to_string));
        aliases.sort();
        aliases.dedup();

        let mut actions = Vec::new();
        for alias in &aliases {
            let previous = current_alias_indices(transport, alias).await?;
            for old_index in previous {
                if old_index != concrete_index {
                    actions.push(json!({ "remove": { "index": old_index, "alias": alias } }));
                }
            }
            actions.push(json!({ "add": { "index": concrete_index, "alias": alias } }));
        }

        let response = transport
            .request(Method::Post, "_aliases", Some(json!({ "actions": actions })))
            .await?;
        if !response.is_success() {
            return Err(IngestError::AliasSwapFailed(format!(
                "status {}",
                response.status
            )));
        }
        Ok(())
    }
}

async fn current_alias_indices(
    transport: &dyn Transport,
    alias: &str,
) -> IngestResult<Vec<String>> {
    let path = format!("_alias/{alias}");
    let response = transport.request(Method::Get, &path, None).await?;
    if !response.is_success() {
        return Ok(Vec::new());
    }
    Ok(index_names_from_alias_body(response.body.as_ref()))
}

fn index_names_from_alias_body(body: Option<&Value>) -> Vec<String> {
    match body.and_then(Value::as_object) {
        Some(obj) => obj.keys().cloned().collect(),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_index_names_from_alias_body() {
        let body = json!({
            "logs-2024.01.01": { "aliases": { "logs-latest": {} } },
        });
        assert_eq!(
            index_names_from_alias_body(Some(&body)),
            vec!["logs-2024.01.01".to_string()]
        );
        assert!(index_names_from_alias_body(None).is_empty());
    }
}
