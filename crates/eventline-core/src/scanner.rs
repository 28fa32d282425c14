//! Resumable per-partition scan over the whole log.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::EventRecord;
use crate::position::{LogPosition, PartitionId};

/// One page of a partition scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanBatch {
    /// Records in ascending commit-position order.
    pub records: Vec<EventRecord>,
    /// Position after the last returned record; the input position when no
    /// records were returned.
    pub next: LogPosition,
    /// `true` when the partition has nothing beyond `next` right now.
    pub at_end: bool,
}

/// Change-feed primitive the subscription engine polls.
///
/// Implementations read the shared store, never a writer's in-process view.
#[async_trait]
pub trait LogScanner: Send + Sync {
    /// Lists every partition of the log.
    fn partitions(&self) -> Vec<PartitionId>;

    /// Returns up to `max_count` records of `partition` committed after
    /// `from`, in ascending commit-position order.
    ///
    /// A position once passed is never back-filled: records that become
    /// visible later always sort after every position previously returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Transient` for retryable failures and
    /// `StoreError::Fatal` for malformed tokens or unrecoverable faults.
    async fn scan(
        &self,
        partition: PartitionId,
        from: &LogPosition,
        max_count: usize,
    ) -> Result<ScanBatch, StoreError>;
}
