//! Event Record Codec: converts event records to and from their persisted
//! row shape. Pure, no I/O.

use chrono::{DateTime, Utc};
use eventline_core::error::StoreError;
use eventline_core::event::{EventData, EventRecord, Metadata};
use eventline_core::position::{CommitPosition, PartitionId};
use uuid::Uuid;

/// Columns of an `event_records` row as written by an append. The commit
/// position columns are assigned by the database.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEventRow {
    /// Partition key.
    pub stream_id: String,
    /// Position within the stream.
    pub stream_offset: i64,
    /// Log shard.
    pub partition_id: i32,
    /// Event identity.
    pub event_id: Uuid,
    /// Type tag.
    pub event_type: String,
    /// Opaque body.
    pub payload: Vec<u8>,
    /// Metadata as a JSON object of strings.
    pub metadata: serde_json::Value,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

/// An `event_records` row as read back, including the commit position.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EventRow {
    /// Partition key.
    pub stream_id: String,
    /// Position within the stream.
    pub stream_offset: i64,
    /// Log shard.
    pub partition_id: i32,
    /// Event identity.
    pub event_id: Uuid,
    /// Type tag.
    pub event_type: String,
    /// Opaque body.
    pub payload: Vec<u8>,
    /// Metadata as a JSON object of strings.
    pub metadata: serde_json::Value,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
    /// Writing transaction, selected as `transaction_id::text::bigint`.
    pub transaction_id: i64,
    /// Insertion sequence.
    pub commit_sequence: i64,
}

fn corrupt(what: &str, row: &EventRow) -> StoreError {
    StoreError::Fatal(format!(
        "corrupt event record {}@{}: {what}",
        row.stream_id, row.stream_offset
    ))
}

/// Builds the row written for `event` at `offset`.
///
/// # Errors
///
/// Returns `StoreError::Validation` if the partition id does not fit the
/// column.
pub fn encode(
    stream_id: &str,
    offset: i64,
    event: &EventData,
    partition_id: PartitionId,
    created_at: DateTime<Utc>,
) -> Result<NewEventRow, StoreError> {
    let partition_id = i32::try_from(partition_id.0).map_err(|_| {
        StoreError::Validation(format!("partition id {partition_id} exceeds the column range"))
    })?;
    let metadata = event
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect::<serde_json::Map<_, _>>();

    Ok(NewEventRow {
        stream_id: stream_id.to_owned(),
        stream_offset: offset,
        partition_id,
        event_id: event.event_id,
        event_type: event.event_type.clone(),
        payload: event.payload.clone(),
        metadata: serde_json::Value::Object(metadata),
        created_at,
    })
}

/// Rebuilds an event record from its row.
///
/// # Errors
///
/// Returns `StoreError::Fatal` if the row violates the persisted format:
/// negative offset or commit position, out-of-range partition, or metadata
/// that is not a JSON object of strings.
pub fn decode(row: EventRow) -> Result<EventRecord, StoreError> {
    if row.stream_offset < 0 {
        return Err(corrupt("negative offset", &row));
    }
    let partition_id =
        u32::try_from(row.partition_id).map_err(|_| corrupt("negative partition id", &row))?;
    let transaction =
        u64::try_from(row.transaction_id).map_err(|_| corrupt("negative transaction id", &row))?;
    let sequence =
        u64::try_from(row.commit_sequence).map_err(|_| corrupt("negative commit sequence", &row))?;
    let metadata = decode_metadata(&row)?;

    Ok(EventRecord {
        stream_id: row.stream_id,
        offset: row.stream_offset,
        event_id: row.event_id,
        event_type: row.event_type,
        payload: row.payload,
        metadata,
        timestamp: row.created_at,
        commit_position: CommitPosition::new(transaction, sequence),
        partition_id: PartitionId(partition_id),
    })
}

fn decode_metadata(row: &EventRow) -> Result<Metadata, StoreError> {
    let serde_json::Value::Object(entries) = &row.metadata else {
        return Err(corrupt("metadata is not an object", row));
    };
    entries
        .iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key.clone(), s.clone())),
            _ => Err(corrupt(&format!("metadata value {key:?} is not a string"), row)),
        })
        .collect()
}
