//! The data model shared by every component.

use std::sync::Arc;
use std::time::SystemTime;

use serde_json::Value;

/// What kind of remote target a `TypeContext` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTarget {
    Index,
    DataStream,
    WiredStream,
}

/// How a write target's concrete name is derived at write time.
#[derive(Debug, Clone)]
pub struct DatePattern {
    /// `strftime`-style format string, e.g. `"%Y.%m.%d"`.
    pub format: String,
    /// If true, one timestamp is captured per batch/run and applied to every
    /// item; otherwise each document's own timestamp is used.
    pub use_batch_date: bool,
}

impl DatePattern {
    pub fn render(&self, write_target: &str, at: chrono::DateTime<chrono::Utc>) -> String {
        format!("{write_target}-{}", at.format(&self.format))
    }
}

/// Immutable, compile-time-derived description of one ingestion target.
/// `D` is the caller's document type; the channel never inspects it
/// except through these accessors.
pub struct TypeContext<D> {
    pub entity_target: EntityTarget,
    pub write_target: String,
    pub date_pattern: Option<DatePattern>,
    pub write_alias: Option<String>,
    pub read_alias: Option<String>,

    mappings_json: Arc<dyn Fn() -> Value + Send + Sync>,
    settings_json: Arc<dyn Fn() -> Value + Send + Sync>,
    get_id: Arc<dyn Fn(&D) -> Option<String> + Send + Sync>,
    get_content_hash: Arc<dyn Fn(&D) -> Option<String> + Send + Sync>,
    get_timestamp: Arc<dyn Fn(&D) -> Option<SystemTime> + Send + Sync>,
}

impl<D> Clone for TypeContext<D> {
    fn clone(&self) -> Self {
        Self {
            entity_target: self.entity_target,
            write_target: self.write_target.clone(),
            date_pattern: self.date_pattern.clone(),
            write_alias: self.write_alias.clone(),
            read_alias: self.read_alias.clone(),
            mappings_json: self.mappings_json.clone(),
            settings_json: self.settings_json.clone(),
            get_id: self.get_id.clone(),
            get_content_hash: self.get_content_hash.clone(),
            get_timestamp: self.get_timestamp.clone(),
        }
    }
}

impl<D> TypeContext<D> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        entity_target: EntityTarget,
        write_target: impl Into<String>,
        mappings_json: impl Fn() -> Value + Send + Sync + 'static,
        settings_json: impl Fn() -> Value + Send + Sync + 'static,
        get_id: impl Fn(&D) -> Option<String> + Send + Sync + 'static,
        get_content_hash: impl Fn(&D) -> Option<String> + Send + Sync + 'static,
        get_timestamp: impl Fn(&D) -> Option<SystemTime> + Send + Sync + 'static,
    ) -> Self {
        Self {
            entity_target,
            write_target: write_target.into(),
            date_pattern: None,
            write_alias: None,
            read_alias: None,
            mappings_json: Arc::new(mappings_json),
            settings_json: Arc::new(settings_json),
            get_id: Arc::new(get_id),
            get_content_hash: Arc::new(get_content_hash),
            get_timestamp: Arc::new(get_timestamp),
        }
    }

    pub fn with_date_pattern(mut self, pattern: DatePattern) -> Self {
        self.date_pattern = Some(pattern);
        self
    }

    pub fn with_aliases(
        mut self,
        write_alias: Option<impl Into<String>>,
        read_alias: Option<impl Into<String>>,
    ) -> Self {
        self.write_alias = write_alias.map(Into::into);
        self.read_alias = read_alias.map(Into::into);
        self
    }

    pub fn mappings_json(&self) -> Value {
        (self.mappings_json)()
    }

    pub fn settings_json(&self) -> Value {
        (self.settings_json)()
    }

    pub fn get_id(&self, doc: &D) -> Option<String> {
        (self.get_id)(doc)
    }

    pub fn get_content_hash(&self, doc: &D) -> Option<String> {
        (self.get_content_hash)(doc)
    }

    pub fn get_timestamp(&self, doc: &D) -> Option<SystemTime> {
        (self.get_timestamp)(doc)
    }

    /// `sha256_hex(mappings || "|" || settings || "|" || salt)`.
    pub fn channel_hash(&self, salt: &str) -> String {
        crate::hash::channel_hash(
            &self.mappings_json().to_string(),
            &self.settings_json().to_string(),
            salt,
        )
    }
}

/// Tagged bulk operation variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpKind {
    Index,
    Create,
    Update,
    Delete,
}

impl OpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Index => "index",
            OpKind::Create => "create",
            OpKind::Update => "update",
            OpKind::Delete => "delete",
        }
    }
}

/// One NDJSON header + body pair, ready for the codec.
#[derive(Debug, Clone)]
pub struct BulkOperation {
    pub kind: OpKind,
    pub index: Option<String>,
    pub id: Option<String>,
    pub require_alias: Option<bool>,
    pub dynamic_templates: Option<Value>,
    /// The document body. For `Update` the codec wraps this as
    /// `{"doc": body, "doc_as_upsert": true}`; for `Delete` the body is
    /// omitted entirely.
    pub body: Value,
    /// Optional Painless script for the scripted-update extension.
    pub script: Option<ScriptedUpdate>,
}

/// Alternate update mode embedding a Painless script and its parameters,
/// enabled only when a strategy opts into it.
#[derive(Debug, Clone)]
pub struct ScriptedUpdate {
    pub source: String,
    pub params: Value,
}

/// One item of a parsed bulk response.
#[derive(Debug, Clone)]
pub struct BulkResponseItem {
    pub action: String,
    pub status: u16,
    pub id: Option<String>,
    pub index: Option<String>,
    pub error: Option<Value>,
}

impl BulkResponseItem {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.status, 429 | 503)
    }

    pub fn is_fatal(&self) -> bool {
        !self.is_ok() && !self.is_retryable()
    }
}
