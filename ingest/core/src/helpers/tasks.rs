//! Async task runners and the shared polling primitive.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{IngestError, IngestResult};
use crate::transport::{Method, Transport};

/// Outcome of a completed `_reindex`/`_update_by_query`/`_delete_by_query`
/// task.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub version_conflicts: u64,
    pub error: Option<Value>,
}

impl TaskOutcome {
    fn from_response(response: &Value) -> Self {
        let body = response.get("response").unwrap_or(response);
        Self {
            created: body.get("created").and_then(Value::as_u64).unwrap_or(0),
            updated: body.get("updated").and_then(Value::as_u64).unwrap_or(0),
            deleted: body.get("deleted").and_then(Value::as_u64).unwrap_or(0),
            version_conflicts: body
                .get("version_conflicts")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            error: response.get("error").cloned(),
        }
    }
}

/// The shared polling loop: `GET /_tasks/{id}` at `poll_interval` until
/// `completed:true`.
pub async fn poll_task(
    transport: &dyn Transport,
    task_id: &str,
    poll_interval: Duration,
) -> IngestResult<TaskOutcome> {
    let path = format!("_tasks/{task_id}");
    loop {
        let response = transport.request(Method::Get, &path, None).await?;
        let body = response
            .body
            .ok_or_else(|| IngestError::Internal("task poll response had no body".into()))?;
        let completed = body.get("completed").and_then(Value::as_bool).unwrap_or(false);
        if completed {
            return Ok(TaskOutcome::from_response(&body));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn launch_and_poll(
    transport: &dyn Transport,
    path: &str,
    body: Value,
    poll_interval: Duration,
) -> IngestResult<TaskOutcome> {
    let response = transport.request(Method::Post, path, Some(body)).await?;
    if !response.is_success() {
        return Err(IngestError::Internal(format!(
            "task launch at {path} failed with status {}",
            response.status
        )));
    }
    let task_id = response
        .body
        .as_ref()
        .and_then(|b| b.get("task"))
        .and_then(Value::as_str)
        .ok_or_else(|| IngestError::Internal("task launch response missing task id".into()))?;
    poll_task(transport, task_id, poll_interval).await
}

/// `POST _reindex?wait_for_completion=false` from `source` to `dest`,
/// polled to completion.
pub async fn server_reindex(
    transport: &dyn Transport,
    source_index: &str,
    dest_index: &str,
    poll_interval: Duration,
) -> IngestResult<TaskOutcome> {
    let body = json!({
        "source": { "index": source_index },
        "dest": { "index": dest_index },
    });
    launch_and_poll(
        transport,
        "_reindex?wait_for_completion=false",
        body,
        poll_interval,
    )
    .await
    .map_err(|err| IngestError::ReindexTaskFailed(err.to_string()))
}

/// `POST {index}/_update_by_query?wait_for_completion=false[&pipeline=...]`.
pub async fn update_by_query(
    transport: &dyn Transport,
    index: &str,
    query: Value,
    pipeline: Option<&str>,
    poll_interval: Duration,
) -> IngestResult<TaskOutcome> {
    let mut path = format!("{index}/_update_by_query?wait_for_completion=false");
    if let Some(pipeline) = pipeline {
        path.push_str(&format!("&pipeline={pipeline}"));
    }
    let body = json!({ "query": query });
    launch_and_poll(transport, &path, body, poll_interval)
        .await
        .map_err(|err| IngestError::BackfillTaskFailed(err.to_string()))
}

/// `POST {index}/_delete_by_query?wait_for_completion=false`.
pub async fn delete_by_query(
    transport: &dyn Transport,
    index: &str,
    query: Value,
    poll_interval: Duration,
) -> IngestResult<TaskOutcome> {
    let path = format!("{index}/_delete_by_query?wait_for_completion=false");
    let body = json!({ "query": query });
    launch_and_poll(transport, &path, body, poll_interval).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_outcome_from_wrapped_response() {
        let response = json!({
            "completed": true,
            "response": { "created": 3, "updated": 1, "deleted": 0, "version_conflicts": 2 },
        });
        let outcome = TaskOutcome::from_response(&response);
        assert_eq!(outcome.created, 3);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.version_conflicts, 2);
        assert!(outcome.error.is_none());
    }
}
