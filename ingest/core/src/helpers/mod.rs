//! Shared server-interaction helpers: point-in-time paged
//! search and the async-task polling primitives used by reindex,
//! update-by-query, and delete-by-query.

pub mod pit;
pub mod tasks;
