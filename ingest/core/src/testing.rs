//! An in-memory `Transport` used by this crate's own unit tests and
//! offered to downstream crates that want to exercise strategies,
//! bootstrap, or the orchestrator without a live cluster.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IngestResult;
use crate::transport::{Method, Transport, TransportResponse};

/// A single recorded call against `MockTransport`.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub raw_body: Option<String>,
}

/// A scripted `Transport`: callers queue responses with `queue_response`
/// (consumed in FIFO order) or register a fixed response per path with
/// `set_response`; every call is recorded for later assertions.
pub struct MockTransport {
    queued: Mutex<VecDeque<TransportResponse>>,
    fixed: Mutex<Vec<(String, TransportResponse)>>,
    calls: Mutex<Vec<RecordedCall>>,
    default_status: u16,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fixed: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            default_status: 200,
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_status(status: u16) -> Self {
        Self {
            default_status: status,
            ..Self::default()
        }
    }

    pub fn queue_response(&self, status: u16, body: Option<Value>) {
        self.queued.lock().unwrap().push_back(TransportResponse {
            status,
            body,
            raw: None,
        });
    }

    pub fn set_response(&self, path: &str, status: u16, body: Option<Value>) {
        self.fixed.lock().unwrap().push((
            path.to_string(),
            TransportResponse {
                status,
                body,
                raw: None,
            },
        ));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn resolve(&self, path: &str) -> TransportResponse {
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return next;
        }
        if let Some((_, response)) = self
            .fixed
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
        {
            return response.clone();
        }
        TransportResponse {
            status: self.default_status,
            body: Some(serde_json::json!({})),
            raw: None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> IngestResult<TransportResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body: body.clone(),
            raw_body: None,
        });
        Ok(self.resolve(path))
    }

    async fn request_raw(
        &self,
        method: Method,
        path: &str,
        raw_body: String,
        _content_type: &str,
    ) -> IngestResult<TransportResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            method,
            path: path.to_string(),
            body: None,
            raw_body: Some(raw_body),
        });
        Ok(self.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_calls_and_serves_queued_responses() {
        let transport = MockTransport::new();
        transport.queue_response(201, Some(serde_json::json!({ "ok": true })));

        let response = transport.request(Method::Put, "widgets", None).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(transport.calls()[0].path, "widgets");
    }

    #[tokio::test]
    async fn falls_back_to_fixed_response_by_path_prefix() {
        let transport = MockTransport::new();
        transport.set_response("_component_template/", 200, Some(serde_json::json!({ "x": 1 })));

        let response = transport
            .request(Method::Get, "_component_template/foo-mappings", None)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body.unwrap()["x"], serde_json::json!(1));
    }
}
