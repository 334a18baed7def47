//! The transport boundary.
//!
//! The pipeline never speaks HTTP directly; it drives an abstract
//! `Transport` so that the hard parts (channel, codec, bootstrap,
//! orchestration, enrichment) can be tested without a real cluster and
//! can be retargeted at a different wire client.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IngestResult;

/// HTTP verb used by a transport call. Kept as an enum rather than
/// `http::Method` so `ingest-core` has no HTTP crate dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }
}

/// Result of a transport call: the HTTP status and an optional parsed JSON
/// body. `HEAD` requests and empty bodies carry `None`.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<Value>,
    /// Raw body bytes, used for NDJSON bulk request bodies where the
    /// request side needs to send pre-framed text instead of a JSON value.
    pub raw: Option<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// `Request(method, path, body) -> (status, body, err)`
///
/// `body` is `None` for bodyless calls. `raw_body`, when set, is sent
/// verbatim (used for the NDJSON `_bulk` payload) instead of JSON-encoding
/// `body`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> IngestResult<TransportResponse>;

    /// Send a pre-framed NDJSON body (the bulk request). Default
    /// implementations of callers should prefer this over `request` when
    /// they already hold framed text, since the codec output must not be
    /// re-serialized as a JSON value.
    async fn request_raw(
        &self,
        method: Method,
        path: &str,
        raw_body: String,
        content_type: &str,
    ) -> IngestResult<TransportResponse>;
}
