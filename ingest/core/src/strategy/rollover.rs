//! Rollover: `POST /{alias}/_rollover` with the caller's
//! conditions.

use serde_json::{json, Value};

use crate::error::{IngestError, IngestResult};
use crate::transport::{Method, Transport};

#[derive(Debug, Clone, Default)]
pub struct RolloverConditions {
    pub max_age: Option<String>,
    pub max_size: Option<String>,
    pub max_docs: Option<u64>,
}

impl RolloverConditions {
    fn to_json(&self) -> Value {
        let mut conditions = serde_json::Map::new();
        if let Some(max_age) = &self.max_age {
            conditions.insert("max_age".to_string(), json!(max_age));
        }
        if let Some(max_size) = &self.max_size {
            conditions.insert("max_size".to_string(), json!(max_size));
        }
        if let Some(max_docs) = self.max_docs {
            conditions.insert("max_docs".to_string(), json!(max_docs));
        }
        json!({ "conditions": conditions })
    }
}

pub async fn rollover(
    transport: &dyn Transport,
    alias: &str,
    conditions: &RolloverConditions,
) -> IngestResult<Value> {
    let path = format!("{alias}/_rollover");
    let response = transport
        .request(Method::Post, &path, Some(conditions.to_json()))
        .await?;
    if !response.is_success() {
        return Err(IngestError::Internal(format!(
            "rollover on {alias} failed with status {}",
            response.status
        )));
    }
    response
        .body
        .ok_or_else(|| IngestError::Internal("rollover response had no body".into()))
}
