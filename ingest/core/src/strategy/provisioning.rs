//! Provisioning strategies: decide whether the current dated
//! index is reusable before the channel starts writing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::IngestResult;
use crate::transport::{Method, Transport};
use crate::types::DatePattern;

/// Outcome of resolving which concrete index a bootstrap should target.
#[derive(Debug, Clone)]
pub struct ResolvedIndex {
    pub name: String,
    /// True if an existing index was reused rather than a new one created.
    pub reused: bool,
}

/// Object-safe: takes the plain fields a resolution needs rather than a
/// generic `TypeContext<D>`, so it can be shared as `Arc<dyn
/// ProvisioningStrategy>` across every document type.
#[async_trait]
pub trait ProvisioningStrategy: Send + Sync {
    async fn resolve(
        &self,
        transport: &dyn Transport,
        write_target: &str,
        date_pattern: Option<&DatePattern>,
        channel_hash: &str,
        batch_date: DateTime<Utc>,
    ) -> IngestResult<ResolvedIndex>;
}

/// Every bootstrap creates a new dated concrete index. For data streams this
/// is a no-op since Elasticsearch manages backing indices itself.
pub struct AlwaysCreate;

#[async_trait]
impl ProvisioningStrategy for AlwaysCreate {
    async fn resolve(
        &self,
        _transport: &dyn Transport,
        write_target: &str,
        date_pattern: Option<&DatePattern>,
        _channel_hash: &str,
        batch_date: DateTime<Utc>,
    ) -> IngestResult<ResolvedIndex> {
        let name = match date_pattern {
            Some(pattern) => pattern.render(write_target, batch_date),
            None => write_target.to_string(),
        };
        Ok(ResolvedIndex {
            name,
            reused: false,
        })
    }
}

/// Queries `_resolve/index/{wildcard}`; if an existing index's `_meta.hash`
/// equals `channel_hash`, that index name is reused and the date suffix is
/// not advanced.
pub struct HashBasedReuse;

#[async_trait]
impl ProvisioningStrategy for HashBasedReuse {
    async fn resolve(
        &self,
        transport: &dyn Transport,
        write_target: &str,
        date_pattern: Option<&DatePattern>,
        channel_hash: &str,
        batch_date: DateTime<Utc>,
    ) -> IngestResult<ResolvedIndex> {
        let wildcard = format!("{write_target}-*");
        let path = format!("_resolve/index/{wildcard}");
        let response = transport.request(Method::Get, &path, None).await?;

        if let Some(existing) = find_matching_index(response.body.as_ref(), channel_hash) {
            return Ok(ResolvedIndex {
                name: existing,
                reused: true,
            });
        }

        let name = match date_pattern {
            Some(pattern) => pattern.render(write_target, batch_date),
            None => write_target.to_string(),
        };
        Ok(ResolvedIndex {
            name,
            reused: false,
        })
    }
}

fn find_matching_index(body: Option<&Value>, channel_hash: &str) -> Option<String> {
    let indices = body?.get("indices")?.as_array()?;
    for entry in indices {
        let name = entry.get("name")?.as_str()?;
        if let Some(hash) = entry
            .get("_meta")
            .and_then(|m| m.get("hash"))
            .and_then(Value::as_str)
        {
            if hash == channel_hash {
                return Some(name.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finds_index_with_matching_hash() {
        let body = json!({
            "indices": [
                { "name": "logs-2024.01.01", "_meta": { "hash": "abc" } },
                { "name": "logs-2024.01.02", "_meta": { "hash": "def" } },
            ]
        });
        assert_eq!(
            find_matching_index(Some(&body), "def"),
            Some("logs-2024.01.02".to_string())
        );
        assert_eq!(find_matching_index(Some(&body), "zzz"), None);
    }
}
