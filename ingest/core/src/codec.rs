//! NDJSON bulk-request framing and response parsing.

use serde_json::{json, Map, Value};

use crate::error::{IngestError, IngestResult};
use crate::types::{BulkOperation, BulkResponseItem, OpKind};

/// Encode a page of operations as the exact `_bulk` wire format: for each
/// operation, a header line then a body line, each terminated by `\n`, with
/// no commas between documents.
pub fn encode(operations: &[BulkOperation]) -> String {
    let mut out = String::new();
    for op in operations {
        out.push_str(&header_json(op).to_string());
        out.push('\n');
        if op.kind != OpKind::Delete {
            out.push_str(&body_json(op).to_string());
            out.push('\n');
        }
    }
    out
}

fn header_json(op: &BulkOperation) -> Value {
    let mut inner = Map::new();
    if let Some(index) = &op.index {
        inner.insert("_index".to_string(), Value::String(index.clone()));
    }
    if let Some(id) = &op.id {
        inner.insert("_id".to_string(), Value::String(id.clone()));
    }
    if let Some(require_alias) = op.require_alias {
        inner.insert("require_alias".to_string(), Value::Bool(require_alias));
    }
    if let Some(templates) = &op.dynamic_templates {
        inner.insert("dynamic_templates".to_string(), templates.clone());
    }
    json!({ op.kind.as_str(): inner })
}

fn body_json(op: &BulkOperation) -> Value {
    match op.kind {
        OpKind::Update => {
            if let Some(script) = &op.script {
                json!({
                    "script": {
                        "source": script.source,
                        "params": script.params,
                    },
                    "upsert": op.body,
                })
            } else {
                json!({ "doc": op.body, "doc_as_upsert": true })
            }
        }
        _ => op.body.clone(),
    }
}

/// Parsed bulk response: `{took, errors, items: [...]}`.
#[derive(Debug, Clone)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub has_errors: bool,
    pub items: Vec<BulkResponseItem>,
}

/// Parse a `_bulk` response body. The spec requires that the `items` array
/// be the same length as the input page; callers are expected to validate
/// that separately once they have the input page in hand (see
/// `validate_item_count`).
pub fn decode(body: &Value) -> IngestResult<BulkResponse> {
    let took_ms = body.get("took").and_then(Value::as_u64).unwrap_or(0);
    let has_errors = body
        .get("errors")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let raw_items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| IngestError::Internal("bulk response missing items array".into()))?;

    let mut items = Vec::with_capacity(raw_items.len());
    for raw in raw_items {
        let obj = raw
            .as_object()
            .ok_or_else(|| IngestError::Internal("bulk response item is not an object".into()))?;
        let (action, detail) = obj
            .iter()
            .next()
            .ok_or_else(|| IngestError::Internal("bulk response item has no action key".into()))?;
        let status = detail
            .get("status")
            .and_then(Value::as_u64)
            .ok_or_else(|| IngestError::Internal("bulk response item missing status".into()))?
            as u16;
        items.push(BulkResponseItem {
            action: action.clone(),
            status,
            id: detail
                .get("_id")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            index: detail
                .get("_index")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
            error: detail.get("error").cloned(),
        });
    }

    Ok(BulkResponse {
        took_ms,
        has_errors,
        items,
    })
}

/// Validate that the response's item count matches the input page's length.
pub fn validate_item_count(response: &BulkResponse, page_len: usize) -> IngestResult<()> {
    if response.items.len() != page_len {
        return Err(IngestError::Internal(format!(
            "bulk response item count {} does not match page length {}",
            response.items.len(),
            page_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index_op(index: &str, id: &str) -> BulkOperation {
        BulkOperation {
            kind: OpKind::Index,
            index: Some(index.to_string()),
            id: Some(id.to_string()),
            require_alias: None,
            dynamic_templates: None,
            body: json!({ "field": "value" }),
            script: None,
        }
    }

    #[test]
    fn encode_emits_two_lines_per_document() {
        let ops = vec![index_op("logs-1", "a"), index_op("logs-1", "b")];
        let encoded = encode(&ops);
        let lines: Vec<&str> = encoded.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(!encoded.contains(','));
    }

    #[test]
    fn update_wraps_doc_as_upsert() {
        let op = BulkOperation {
            kind: OpKind::Update,
            index: Some("logs-1".into()),
            id: Some("a".into()),
            require_alias: None,
            dynamic_templates: None,
            body: json!({ "field": "value" }),
            script: None,
        };
        let encoded = encode(std::slice::from_ref(&op));
        let body_line = encoded.lines().nth(1).unwrap();
        let body: Value = serde_json::from_str(body_line).unwrap();
        assert_eq!(body["doc_as_upsert"], json!(true));
        assert_eq!(body["doc"]["field"], json!("value"));
    }

    #[test]
    fn delete_has_no_body_line() {
        let op = BulkOperation {
            kind: OpKind::Delete,
            index: Some("logs-1".into()),
            id: Some("a".into()),
            require_alias: None,
            dynamic_templates: None,
            body: Value::Null,
            script: None,
        };
        let encoded = encode(std::slice::from_ref(&op));
        assert_eq!(encoded.lines().count(), 1);
    }

    #[test]
    fn header_round_trip_recovers_action_and_id() {
        let op = index_op("logs-1", "a");
        let header = header_json(&op);
        let obj = header.as_object().unwrap();
        let (action, detail) = obj.iter().next().unwrap();
        assert_eq!(action, "index");
        assert_eq!(detail["_index"], json!("logs-1"));
        assert_eq!(detail["_id"], json!("a"));
    }

    #[test]
    fn decode_parses_items_and_classifies_status() {
        let body = json!({
            "took": 12,
            "errors": true,
            "items": [
                { "index": { "status": 201, "_id": "a", "_index": "logs-1" } },
                { "index": { "status": 429, "_id": "b", "_index": "logs-1" } },
                { "index": { "status": 400, "_id": "c", "_index": "logs-1", "error": {"type": "mapper_parsing_exception"} } },
            ]
        });
        let decoded = decode(&body).unwrap();
        assert_eq!(decoded.took_ms, 12);
        assert!(decoded.has_errors);
        assert_eq!(decoded.items.len(), 3);
        assert!(decoded.items[0].is_ok());
        assert!(decoded.items[1].is_retryable());
        assert!(decoded.items[2].is_fatal());
        validate_item_count(&decoded, 3).unwrap();
        assert!(validate_item_count(&decoded, 2).is_err());
    }
}
