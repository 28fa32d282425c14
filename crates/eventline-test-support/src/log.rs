//! In-memory event log implementing both `StreamLog` and `LogScanner`.

use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eventline_core::clock::{Clock, SystemClock};
use eventline_core::error::StoreError;
use eventline_core::event::{AppendResult, EventData, EventRecord, validate_append, validate_stream_id};
use eventline_core::position::{CommitPosition, LogPosition, PartitionId, all_partitions, partition_for};
use eventline_core::scanner::{LogScanner, ScanBatch};
use eventline_core::stream_log::{EventStream, StreamLog};
use futures::stream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct LogState {
    /// Keyed by `(stream_id, offset)`; occupancy of a key is the uniqueness
    /// constraint.
    rows: BTreeMap<(String, i64), EventRecord>,
    next_transaction: u64,
    next_sequence: u64,
}

impl LogState {
    fn stream_length(&self, stream_id: &str) -> i64 {
        self.rows
            .range((stream_id.to_owned(), 0)..=(stream_id.to_owned(), i64::MAX))
            .next_back()
            .map_or(0, |((_, offset), _)| offset + 1)
    }
}

/// An event store held entirely in memory.
///
/// Appends are atomic per call and conflicts are detected purely from key
/// occupancy, mirroring the unique `(stream_id, offset)` constraint of the
/// PostgreSQL backend. Every append call gets its own transaction number, so
/// commit positions order the same way as in PostgreSQL.
pub struct InMemoryEventStore {
    partition_count: NonZeroU32,
    clock: Arc<dyn Clock>,
    state: Mutex<LogState>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("partition_count", &self.partition_count)
            .finish_non_exhaustive()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store with `partition_count` partitions.
    #[must_use]
    pub fn new(partition_count: NonZeroU32, clock: Arc<dyn Clock>) -> Self {
        Self {
            partition_count,
            clock,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Creates an empty store on the system clock.
    ///
    /// # Panics
    ///
    /// Panics if `partition_count` is zero.
    #[must_use]
    pub fn with_partitions(partition_count: u32) -> Self {
        let partition_count =
            NonZeroU32::new(partition_count).expect("partition count must be non-zero");
        Self::new(partition_count, Arc::new(SystemClock))
    }

    /// Returns the partition a stream maps to.
    #[must_use]
    pub fn partition_of(&self, stream_id: &str) -> PartitionId {
        partition_for(stream_id, self.partition_count)
    }

    /// Returns every stored record, ordered by stream then offset.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn records(&self) -> Vec<EventRecord> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }
}

#[async_trait]
impl StreamLog for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected_offset: i64,
        events: &[EventData],
        cancel: &CancellationToken,
    ) -> Result<AppendResult, StoreError> {
        validate_append(stream_id, expected_offset, events)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut state = self.state.lock().unwrap();
        let length = state.stream_length(stream_id);
        if expected_offset > length {
            return Err(StoreError::OffsetGap {
                stream_id: stream_id.to_owned(),
                expected: expected_offset,
                actual: length,
            });
        }

        let offsets = (expected_offset..).take(events.len());
        let taken = offsets
            .clone()
            .any(|offset| state.rows.contains_key(&(stream_id.to_owned(), offset)));
        if taken || (events.is_empty() && expected_offset < length) {
            return Err(StoreError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected: expected_offset,
                actual: length,
            });
        }

        let transaction = state.next_transaction;
        state.next_transaction += 1;
        let timestamp = self.clock.now();
        let partition_id = self.partition_of(stream_id);

        for (offset, event) in offsets.zip(events) {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let record = EventRecord {
                stream_id: stream_id.to_owned(),
                offset,
                event_id: event.event_id,
                event_type: event.event_type.clone(),
                payload: event.payload.clone(),
                metadata: event.metadata.clone(),
                timestamp,
                commit_position: CommitPosition::new(transaction, sequence),
                partition_id,
            };
            state.rows.insert((stream_id.to_owned(), offset), record);
        }

        #[allow(clippy::cast_possible_wrap)]
        let next_offset = expected_offset + events.len() as i64;
        Ok(AppendResult {
            stream_id: stream_id.to_owned(),
            first_offset: expected_offset,
            next_offset,
            event_ids: events.iter().map(|e| e.event_id).collect(),
        })
    }

    fn read_stream<'a>(
        &'a self,
        stream_id: &'a str,
        from_offset: i64,
        max_count: usize,
    ) -> EventStream<'a> {
        if let Err(err) = validate_stream_id(stream_id) {
            return Box::pin(stream::iter([Err::<EventRecord, _>(err)]));
        }
        if from_offset < 0 {
            return Box::pin(stream::iter([Err::<EventRecord, _>(StoreError::Validation(format!(
                "from offset must not be negative, got {from_offset}"
            )))]));
        }

        let records: Vec<Result<EventRecord, StoreError>> = self
            .state
            .lock()
            .unwrap()
            .rows
            .range((stream_id.to_owned(), from_offset)..=(stream_id.to_owned(), i64::MAX))
            .take(max_count)
            .map(|(_, record)| Ok(record.clone()))
            .collect();
        Box::pin(stream::iter(records))
    }

    async fn stream_length(&self, stream_id: &str) -> Result<i64, StoreError> {
        validate_stream_id(stream_id)?;
        Ok(self.state.lock().unwrap().stream_length(stream_id))
    }

    async fn delete_stream(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        validate_stream_id(stream_id)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut state = self.state.lock().unwrap();
        let before = state.rows.len();
        state.rows.retain(|(stream, _), _| stream != stream_id);
        Ok((before - state.rows.len()) as u64)
    }
}

#[async_trait]
impl LogScanner for InMemoryEventStore {
    fn partitions(&self) -> Vec<PartitionId> {
        all_partitions(self.partition_count).collect()
    }

    async fn scan(
        &self,
        partition: PartitionId,
        from: &LogPosition,
        max_count: usize,
    ) -> Result<ScanBatch, StoreError> {
        let after = from.commit_position()?;
        let mut records: Vec<EventRecord> = self
            .state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.partition_id == partition)
            .filter(|r| after.is_none_or(|after| r.commit_position > after))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.commit_position);
        let at_end = records.len() <= max_count;
        records.truncate(max_count);

        let next = records
            .last()
            .map_or_else(|| from.clone(), |r| LogPosition::After(r.commit_position.to_token()));
        Ok(ScanBatch {
            records,
            next,
            at_end,
        })
    }
}
