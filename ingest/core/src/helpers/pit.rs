//! Point-in-time paged search.

use serde_json::{json, Value};

use crate::error::{IngestError, IngestResult};
use crate::transport::{Method, Transport};

/// One page of a point-in-time scan.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub docs: Vec<Value>,
    pub next_search_after: Option<Value>,
    pub has_more: bool,
    pub total: u64,
}

/// An open point-in-time handle. Callers page through `search_after`
/// with `next_page` and must call `dispose` when finished.
pub struct PointInTimeSearch<'t> {
    transport: &'t dyn Transport,
    pit_id: String,
    keep_alive: String,
    page_size: usize,
}

impl<'t> PointInTimeSearch<'t> {
    /// `POST /{index}/_pit?keep_alive=...`.
    pub async fn open(
        transport: &'t dyn Transport,
        index: &str,
        keep_alive: &str,
        page_size: usize,
    ) -> IngestResult<Self> {
        let path = format!("{index}/_pit?keep_alive={keep_alive}");
        let response = transport.request(Method::Post, &path, None).await?;
        let pit_id = response
            .body
            .as_ref()
            .and_then(|b| b.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::Internal("pit open response missing id".into()))?
            .to_string();
        Ok(Self {
            transport,
            pit_id,
            keep_alive: keep_alive.to_string(),
            page_size,
        })
    }

    /// Fetch the next page after `search_after` (`None` for the first
    /// page). `query` and `slice` (for parallel scans) are caller-supplied.
    pub async fn next_page(
        &self,
        query: Option<Value>,
        sort: Value,
        search_after: Option<Value>,
        slice: Option<Value>,
    ) -> IngestResult<SearchPage> {
        let mut body = serde_json::Map::new();
        body.insert("size".to_string(), json!(self.page_size));
        body.insert(
            "pit".to_string(),
            json!({ "id": self.pit_id, "keep_alive": self.keep_alive }),
        );
        body.insert("sort".to_string(), sort);
        if let Some(query) = query {
            body.insert("query".to_string(), query);
        }
        if let Some(search_after) = &search_after {
            body.insert("search_after".to_string(), search_after.clone());
        }
        if let Some(slice) = slice {
            body.insert("slice".to_string(), slice);
        }

        let response = self
            .transport
            .request(Method::Post, "_search", Some(Value::Object(body)))
            .await?;
        let body = response
            .body
            .ok_or_else(|| IngestError::Internal("search response had no body".into()))?;
        let hits = body
            .get("hits")
            .ok_or_else(|| IngestError::Internal("search response missing hits".into()))?;
        let docs: Vec<Value> = hits
            .get("hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let total = hits
            .get("total")
            .and_then(|t| t.get("value"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let next_search_after = docs.last().and_then(|d| d.get("sort")).cloned();
        let has_more = docs.len() == self.page_size;

        Ok(SearchPage {
            docs,
            next_search_after,
            has_more,
            total,
        })
    }

    /// `DELETE /_pit`.
    pub async fn dispose(self) -> IngestResult<()> {
        let body = json!({ "id": self.pit_id });
        self.transport
            .request(Method::Delete, "_pit", Some(body))
            .await?;
        Ok(())
    }
}
