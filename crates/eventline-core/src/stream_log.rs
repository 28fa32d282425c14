//! Stream log abstraction: append, replay and delete per-stream events.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::event::{AppendResult, EventData, EventRecord};

/// Lazy, finite sequence of events produced by [`StreamLog::read_stream`].
///
/// Dropping the stream cancels any in-flight page fetch.
pub type EventStream<'a> = BoxStream<'a, Result<EventRecord, StoreError>>;

/// Store trait for appending to and replaying individual streams.
///
/// The `(stream_id, offset)` uniqueness constraint of the backing store is the
/// only concurrency-control mechanism; implementations must not add locking
/// on top of it.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Appends `events` at `expected_offset, expected_offset + 1, …` as one
    /// atomic unit.
    ///
    /// # Errors
    ///
    /// - `StoreError::ConcurrencyConflict` if any assigned offset is taken.
    /// - `StoreError::OffsetGap` if `expected_offset` is past the end.
    /// - `StoreError::Cancelled` if `cancel` fired before the commit; nothing
    ///   was written.
    /// - `StoreError::Transient`/`Fatal` for storage failures.
    async fn append(
        &self,
        stream_id: &str,
        expected_offset: i64,
        events: &[EventData],
        cancel: &CancellationToken,
    ) -> Result<AppendResult, StoreError>;

    /// Replays up to `max_count` events of a stream starting at
    /// `from_offset`, in ascending offset order.
    ///
    /// An absent stream or an empty range yields an empty sequence. Calling
    /// again restarts the replay.
    fn read_stream<'a>(
        &'a self,
        stream_id: &'a str,
        from_offset: i64,
        max_count: usize,
    ) -> EventStream<'a>;

    /// Returns the offset the next append must expect (0 for an absent
    /// stream).
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the stream length cannot be read.
    async fn stream_length(&self, stream_id: &str) -> Result<i64, StoreError>;

    /// Removes every event of a stream and returns how many were removed.
    /// Deleting an absent stream succeeds with zero.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the deletion fails or is cancelled.
    async fn delete_stream(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError>;
}
