//! The per-page export algorithm.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{self, BulkResponse};
use crate::error::{IngestError, IngestResult};
use crate::transport::{Method, Transport};
use crate::types::BulkOperation;

use super::observer::{ChannelObserver, ExportStats};

/// Non-decreasing, cancellable backoff curve.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

pub fn default_backoff() -> BackoffFn {
    Arc::new(|retry: u32| Duration::from_millis(200 * 2u64.saturating_pow(retry.min(10))))
}

/// Send one page to `bulk_url`, retrying the retryable subset up to
/// `max_retries` times, reporting outcomes through `observer`.
///
/// Encodes the page, sends it, classifies the response, and retries the
/// retryable subset with backoff. `on_export_buffer` fires exactly once
/// per page regardless of how many retries occurred.
#[allow(clippy::too_many_arguments)]
pub async fn export_page(
    transport: &dyn Transport,
    bulk_url: &str,
    operations: Vec<BulkOperation>,
    max_retries: u32,
    backoff: &BackoffFn,
    observer: &dyn ChannelObserver,
) -> IngestResult<()> {
    let page_len = operations.len();
    let result = export_with_retry(transport, bulk_url, operations, 0, max_retries, backoff, observer).await;
    observer.on_export_buffer(page_len);
    result
}

#[allow(clippy::too_many_arguments)]
fn export_with_retry<'a>(
    transport: &'a dyn Transport,
    bulk_url: &'a str,
    operations: Vec<BulkOperation>,
    retries: u32,
    max_retries: u32,
    backoff: &'a BackoffFn,
    observer: &'a dyn ChannelObserver,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = IngestResult<()>> + Send + 'a>> {
    Box::pin(async move {
        observer.on_export_attempt(retries, operations.len());

        let raw_body = codec::encode(&operations);
        let response = match transport
            .request_raw(Method::Post, bulk_url, raw_body, "application/x-ndjson")
            .await
        {
            Ok(response) => response,
            Err(err) => {
                observer.on_export_exception(&err);
                if retries < max_retries {
                    tokio::time::sleep(backoff(retries + 1)).await;
                    return export_with_retry(
                        transport,
                        bulk_url,
                        operations,
                        retries + 1,
                        max_retries,
                        backoff,
                        observer,
                    )
                    .await;
                }
                observer.on_export_max_retries(&operations, None);
                return Err(err);
            }
        };

        let body = response
            .body
            .ok_or_else(|| IngestError::Internal("bulk response had no body".into()))?;
        let decoded = codec::decode(&body)?;
        codec::validate_item_count(&decoded, operations.len())?;

        classify_and_retry(
            transport,
            bulk_url,
            operations,
            decoded,
            retries,
            max_retries,
            backoff,
            observer,
        )
        .await
    })
}

#[allow(clippy::too_many_arguments)]
async fn classify_and_retry(
    transport: &dyn Transport,
    bulk_url: &str,
    operations: Vec<BulkOperation>,
    decoded: BulkResponse,
    retries: u32,
    max_retries: u32,
    backoff: &BackoffFn,
    observer: &dyn ChannelObserver,
) -> IngestResult<()> {
    let mut retryable_ops = Vec::new();
    let mut fatal_error = None;
    let mut stats = ExportStats::default();

    for (operation, item) in operations.into_iter().zip(decoded.items.iter()) {
        if item.is_ok() {
            stats.ok += 1;
        } else if item.is_retryable() {
            stats.retryable += 1;
            retryable_ops.push(operation);
        } else {
            stats.fatal += 1;
            if fatal_error.is_none() {
                fatal_error = item.error.clone();
            }
        }
    }

    observer.on_export_response(&decoded, stats);

    if stats.fatal > 0 {
        observer.on_export_max_retries(&[], fatal_error.as_ref());
    }

    if retryable_ops.is_empty() {
        return Ok(());
    }

    if retries < max_retries {
        observer.on_export_retry(&retryable_ops);
        tokio::time::sleep(backoff(retries + 1)).await;
        export_with_retry(
            transport,
            bulk_url,
            retryable_ops,
            retries + 1,
            max_retries,
            backoff,
            observer,
        )
        .await
    } else {
        observer.on_export_max_retries(&retryable_ops, None);
        Ok(())
    }
}
