//! The lookup index's document shape and prompt hashing.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::hash::sha256_hex;

/// One field this orchestrator can enrich: its name, the description used
/// to build the LLM prompt, and the companion hash field name.
#[derive(Debug, Clone)]
pub struct EnrichmentField {
    pub ai_field: String,
    pub description: String,
}

impl EnrichmentField {
    pub fn companion_field(&self) -> String {
        format!("{}_ph", self.ai_field)
    }

    /// `promptHash = sha256_hex(description_string)`, computed once per
    /// field.
    pub fn prompt_hash(&self) -> String {
        sha256_hex(&self.description)
    }
}

/// A pending write to the lookup index: `id = sha256_hex(matchValue)`,
/// merged with `update`/`doc_as_upsert=true`.
#[derive(Debug, Clone)]
pub struct LookupUpdate {
    pub id: String,
    pub doc: Value,
}

impl LookupUpdate {
    pub fn for_match_value(match_value: &str, fields: Value, now: DateTime<Utc>) -> Self {
        let mut doc = match fields {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        doc.insert(
            "created_at".to_string(),
            json!(now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        Self {
            id: sha256_hex(match_value),
            doc: Value::Object(doc),
        }
    }
}

/// Build the `bool.should` staleness query: a field is a candidate when
/// it is missing or its companion hash no longer matches the field's
/// current prompt hash.
pub fn staleness_query(fields: &[EnrichmentField]) -> Value {
    let should: Vec<Value> = fields
        .iter()
        .map(|field| {
            json!({
                "bool": {
                    "should": [
                        { "bool": { "must_not": { "exists": { "field": field.ai_field } } } },
                        {
                            "bool": {
                                "must_not": {
                                    "term": { field.companion_field(): field.prompt_hash() }
                                }
                            }
                        }
                    ],
                    "minimum_should_match": 1,
                }
            })
        })
        .collect();
    json!({ "bool": { "should": should, "minimum_should_match": 1 } })
}

/// The set of fields a stale document still needs enriched, given its
/// current `_ph` companion values.
pub fn stale_fields_for<'a>(
    fields: &'a [EnrichmentField],
    document: &Value,
) -> Vec<&'a EnrichmentField> {
    fields
        .iter()
        .filter(|field| {
            let current_hash = document.get(field.companion_field()).and_then(Value::as_str);
            current_hash != Some(field.prompt_hash().as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_field_detection_follows_companion_hash_mismatch() {
        let field = EnrichmentField {
            ai_field: "summary".to_string(),
            description: "summarize the document".to_string(),
        };
        let hash = field.prompt_hash();

        let fresh = json!({ "summary": "x", "summary_ph": hash });
        assert!(stale_fields_for(&[field.clone()], &fresh).is_empty());

        let stale = json!({ "summary_ph": "stale-value" });
        assert_eq!(stale_fields_for(&[field], &stale).len(), 1);
    }

    #[test]
    fn lookup_update_ids_by_match_value_hash() {
        let update = LookupUpdate::for_match_value("abc", json!({ "summary": "x" }), Utc::now());
        assert_eq!(update.id, sha256_hex("abc"));
        assert!(update.doc.get("created_at").is_some());
    }
}
