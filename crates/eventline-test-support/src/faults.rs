//! Fault-injecting store implementations for error-path tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventline_core::checkpoint::{CheckpointRecord, CheckpointStore, LeaseDecision};
use eventline_core::error::StoreError;
use eventline_core::event::{AppendResult, EventData, EventRecord};
use eventline_core::position::{ContinuationToken, LogPosition, PartitionId};
use eventline_core::scanner::{LogScanner, ScanBatch};
use eventline_core::stream_log::{EventStream, StreamLog};
use futures::{future, stream};
use tokio_util::sync::CancellationToken;

fn connection_refused() -> StoreError {
    StoreError::Transient("connection refused".into())
}

/// A stream log whose every operation fails with a transient error, as if
/// the store were unreachable.
#[derive(Debug)]
pub struct FailingStreamLog;

#[async_trait]
impl StreamLog for FailingStreamLog {
    async fn append(
        &self,
        _stream_id: &str,
        _expected_offset: i64,
        _events: &[EventData],
        _cancel: &CancellationToken,
    ) -> Result<AppendResult, StoreError> {
        Err(connection_refused())
    }

    fn read_stream<'a>(
        &'a self,
        _stream_id: &'a str,
        _from_offset: i64,
        _max_count: usize,
    ) -> EventStream<'a> {
        Box::pin(stream::once(async { Err::<EventRecord, _>(connection_refused()) }))
    }

    async fn stream_length(&self, _stream_id: &str) -> Result<i64, StoreError> {
        Err(connection_refused())
    }

    async fn delete_stream(
        &self,
        _stream_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        Err(connection_refused())
    }
}

/// Wraps a scanner and fails the first `failures` scans with a transient
/// error before delegating.
pub struct FlakyLogScanner {
    inner: Arc<dyn LogScanner>,
    remaining_failures: AtomicU32,
    attempts: AtomicU32,
}

impl std::fmt::Debug for FlakyLogScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyLogScanner")
            .field("remaining_failures", &self.remaining_failures)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl FlakyLogScanner {
    /// Creates a scanner that fails `failures` times, then behaves like
    /// `inner`. `u32::MAX` makes it fail for good.
    #[must_use]
    pub fn new(inner: Arc<dyn LogScanner>, failures: u32) -> Self {
        Self {
            inner,
            remaining_failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of scan calls received so far, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogScanner for FlakyLogScanner {
    fn partitions(&self) -> Vec<PartitionId> {
        self.inner.partitions()
    }

    async fn scan(
        &self,
        partition: PartitionId,
        from: &LogPosition,
        max_count: usize,
    ) -> Result<ScanBatch, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Transient("throttled".into()));
        }
        self.inner.scan(partition, from, max_count).await
    }
}

/// A scanner whose scans never complete, as if the store stopped answering
/// mid-request.
#[derive(Debug)]
pub struct HangingLogScanner {
    partitions: Vec<PartitionId>,
    attempts: AtomicU32,
}

impl HangingLogScanner {
    /// Creates a scanner over `partition_count` partitions.
    #[must_use]
    pub fn new(partition_count: u32) -> Self {
        Self {
            partitions: (0..partition_count).map(PartitionId).collect(),
            attempts: AtomicU32::new(0),
        }
    }

    /// Number of scans started so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogScanner for HangingLogScanner {
    fn partitions(&self) -> Vec<PartitionId> {
        self.partitions.clone()
    }

    async fn scan(
        &self,
        _partition: PartitionId,
        _from: &LogPosition,
        _max_count: usize,
    ) -> Result<ScanBatch, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        future::pending().await
    }
}

/// A checkpoint store that hands out leases but fails every checkpoint save
/// with a fatal error.
#[derive(Debug)]
pub struct FailingCheckpointStore;

#[async_trait]
impl CheckpointStore for FailingCheckpointStore {
    async fn load_checkpoint(
        &self,
        _subscriber_id: &str,
        _partition_id: PartitionId,
    ) -> Result<LogPosition, StoreError> {
        Ok(LogPosition::Start)
    }

    async fn save_checkpoint(
        &self,
        _subscriber_id: &str,
        _partition_id: PartitionId,
        _token: &ContinuationToken,
    ) -> Result<(), StoreError> {
        Err(StoreError::Fatal("checkpoint collection unavailable".into()))
    }

    async fn acquire_lease(
        &self,
        _subscriber_id: &str,
        _partition_id: PartitionId,
        _owner_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseDecision, StoreError> {
        Ok(LeaseDecision::Granted {
            expires_at: eventline_core::checkpoint::lease_expiry(now, ttl)?,
        })
    }

    async fn release_lease(
        &self,
        _subscriber_id: &str,
        _partition_id: PartitionId,
        _owner_id: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_checkpoints(
        &self,
        _subscriber_id: &str,
    ) -> Result<Vec<CheckpointRecord>, StoreError> {
        Ok(vec![])
    }

    async fn delete_subscriber(&self, _subscriber_id: &str) -> Result<u64, StoreError> {
        Ok(0)
    }
}
