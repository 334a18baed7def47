//! Bounded fixed-size batch pages assembled by the inbound reader.

use std::time::Instant;

use crate::types::BulkOperation;

/// A contiguous run of operations, plus the arrival time of its oldest
/// member, used by the batcher to decide whether to flush on age.
pub struct BatchPage {
    pub operations: Vec<BulkOperation>,
    oldest_arrival: Option<Instant>,
}

impl BatchPage {
    pub fn new(capacity: usize) -> Self {
        Self {
            operations: Vec::with_capacity(capacity),
            oldest_arrival: None,
        }
    }

    pub fn push(&mut self, operation: BulkOperation) {
        if self.operations.is_empty() {
            self.oldest_arrival = Some(Instant::now());
        }
        self.operations.push(operation);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_full(&self, max_size: usize) -> bool {
        self.operations.len() >= max_size
    }

    /// True once the oldest buffered item has been waiting longer than
    /// `max_lifetime`.
    pub fn is_stale(&self, max_lifetime: std::time::Duration) -> bool {
        match self.oldest_arrival {
            Some(arrival) => arrival.elapsed() >= max_lifetime,
            None => false,
        }
    }

    pub fn take(&mut self) -> Vec<BulkOperation> {
        self.oldest_arrival = None;
        std::mem::take(&mut self.operations)
    }
}
