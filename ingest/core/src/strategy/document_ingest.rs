//! Document-ingest strategies: produce the bulk URL and the
//! per-item header for one of the three target kinds.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{BulkOperation, OpKind, TypeContext};

/// Whether a document without an explicit id is sent as `index` or `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Index,
    Create,
}

/// Resolves the URL and per-document bulk header for a write.
pub trait DocumentIngestStrategy<D>: Send + Sync {
    /// The `_bulk` URL to POST the page to.
    fn bulk_url(&self, type_ctx: &TypeContext<D>) -> String;

    /// Build the operation for one document. `batch_date`, when the type
    /// context uses `UseBatchDate`, is the single timestamp captured once
    /// for the whole run; otherwise it is ignored in favor of the
    /// document's own timestamp.
    fn build_operation(
        &self,
        type_ctx: &TypeContext<D>,
        doc: &D,
        doc_body: Value,
        batch_date: DateTime<Utc>,
    ) -> BulkOperation;
}

/// Index target: `Update` when the document carries an id, otherwise
/// `Index`/`Create` per `OperationMode`.
pub struct IndexIngest {
    pub operation_mode: OperationMode,
}

impl IndexIngest {
    pub fn new(operation_mode: OperationMode) -> Self {
        Self { operation_mode }
    }

    fn concrete_index<D>(type_ctx: &TypeContext<D>, doc: &D, batch_date: DateTime<Utc>) -> String {
        match &type_ctx.date_pattern {
            None => type_ctx.write_target.clone(),
            Some(pattern) => {
                let at = if pattern.use_batch_date {
                    batch_date
                } else {
                    type_ctx
                        .get_timestamp(doc)
                        .map(DateTime::<Utc>::from)
                        .unwrap_or(batch_date)
                };
                pattern.render(&type_ctx.write_target, at)
            }
        }
    }
}

impl<D> DocumentIngestStrategy<D> for IndexIngest {
    fn bulk_url(&self, _type_ctx: &TypeContext<D>) -> String {
        "_bulk".to_string()
    }

    fn build_operation(
        &self,
        type_ctx: &TypeContext<D>,
        doc: &D,
        doc_body: Value,
        batch_date: DateTime<Utc>,
    ) -> BulkOperation {
        let index = Self::concrete_index(type_ctx, doc, batch_date);
        let id = type_ctx.get_id(doc);

        let kind = match &id {
            Some(_) => OpKind::Update,
            None => match self.operation_mode {
                OperationMode::Index => OpKind::Index,
                OperationMode::Create => OpKind::Create,
            },
        };

        BulkOperation {
            kind,
            index: Some(index),
            id,
            require_alias: None,
            dynamic_templates: None,
            body: doc_body,
            script: None,
        }
    }
}

/// Data-stream target: always `Create`, no `_index` header, URL targets
/// `{datastream}/_bulk`.
pub struct DataStreamIngest;

impl<D> DocumentIngestStrategy<D> for DataStreamIngest {
    fn bulk_url(&self, type_ctx: &TypeContext<D>) -> String {
        format!("{}/_bulk", type_ctx.write_target)
    }

    fn build_operation(
        &self,
        _type_ctx: &TypeContext<D>,
        doc: &D,
        doc_body: Value,
        _batch_date: DateTime<Utc>,
    ) -> BulkOperation {
        let _ = doc; // data streams never carry a caller-supplied id
        BulkOperation {
            kind: OpKind::Create,
            index: None,
            id: None,
            require_alias: None,
            dynamic_templates: None,
            body: doc_body,
            script: None,
        }
    }
}

/// Wired-stream target: serverless-managed, bootstrap is a no-op, writes go
/// to a dedicated logs endpoint rather than the target name.
pub struct WiredStreamIngest {
    pub logs_endpoint: String,
}

impl<D> DocumentIngestStrategy<D> for WiredStreamIngest {
    fn bulk_url(&self, _type_ctx: &TypeContext<D>) -> String {
        format!("{}/_bulk", self.logs_endpoint)
    }

    fn build_operation(
        &self,
        _type_ctx: &TypeContext<D>,
        _doc: &D,
        doc_body: Value,
        _batch_date: DateTime<Utc>,
    ) -> BulkOperation {
        BulkOperation {
            kind: OpKind::Create,
            index: None,
            id: None,
            require_alias: None,
            dynamic_templates: None,
            body: doc_body,
            script: None,
        }
    }
}
