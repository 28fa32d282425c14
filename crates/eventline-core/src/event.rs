//! Event record types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::position::{CommitPosition, PartitionId};

/// Free-form correlation/causation data attached to an event.
pub type Metadata = BTreeMap<String, String>;

/// An event as supplied to an append, before the store assigns its offset,
/// timestamp and commit position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    /// Unique identity of this occurrence.
    pub event_id: Uuid,
    /// Logical event type tag.
    pub event_type: String,
    /// Opaque serialized event body.
    pub payload: Vec<u8>,
    /// Correlation/causation data.
    pub metadata: Metadata,
}

impl EventData {
    /// Creates an event with a fresh `event_id` and no metadata.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload: payload.into(),
            metadata: Metadata::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// One immutable row of the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Stream (partition key) the event belongs to.
    pub stream_id: String,
    /// Zero-based position within the stream.
    pub offset: i64,
    /// Unique identity of this occurrence.
    pub event_id: Uuid,
    /// Logical event type tag.
    pub event_type: String,
    /// Opaque serialized event body.
    pub payload: Vec<u8>,
    /// Correlation/causation data.
    pub metadata: Metadata,
    /// Creation time, shared by every event of one append call.
    pub timestamp: DateTime<Utc>,
    /// Store-assigned ordering marker, only meaningful for catch-up resume.
    pub commit_position: CommitPosition,
    /// Log shard holding the stream.
    pub partition_id: PartitionId,
}

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResult {
    /// Stream that was appended to.
    pub stream_id: String,
    /// Offset assigned to the first event.
    pub first_offset: i64,
    /// Offset the next append must expect.
    pub next_offset: i64,
    /// Ids of the appended events, in offset order.
    pub event_ids: Vec<Uuid>,
}

/// Validates a stream id.
///
/// # Errors
///
/// Returns `StoreError::Validation` if the stream id is blank.
pub fn validate_stream_id(stream_id: &str) -> Result<(), StoreError> {
    if stream_id.trim().is_empty() {
        return Err(StoreError::Validation("stream id must not be empty".into()));
    }
    Ok(())
}

/// Validates the arguments of an append before any I/O.
///
/// # Errors
///
/// Returns `StoreError::Validation` if the stream id is blank, the expected
/// offset is negative, the batch would run past `i64::MAX`, or an event has
/// a blank type.
pub fn validate_append(
    stream_id: &str,
    expected_offset: i64,
    events: &[EventData],
) -> Result<(), StoreError> {
    validate_stream_id(stream_id)?;
    if expected_offset < 0 {
        return Err(StoreError::Validation(format!(
            "expected offset must not be negative, got {expected_offset}"
        )));
    }
    let fits = i64::try_from(events.len())
        .ok()
        .and_then(|count| expected_offset.checked_add(count))
        .is_some();
    if !fits {
        return Err(StoreError::Validation(format!(
            "{} events at offset {expected_offset} exceed the largest stream offset",
            events.len()
        )));
    }
    if let Some(event) = events.iter().find(|e| e.event_type.trim().is_empty()) {
        return Err(StoreError::Validation(format!(
            "event {} has an empty type",
            event.event_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_append_rejects_blank_stream_id() {
        let result = validate_append("  ", 0, &[]);

        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_validate_append_rejects_negative_expected_offset() {
        let result = validate_append("s1", -1, &[]);

        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_validate_append_rejects_offsets_past_i64_max() {
        let events = vec![EventData::new("Created", b"{}".to_vec())];

        let result = validate_append("s1", i64::MAX, &events);

        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_validate_append_accepts_empty_batch_at_i64_max() {
        let result = validate_append("s1", i64::MAX, &[]);

        assert_eq!(result, Ok(()));
    }

    #[test]
    fn test_validate_append_rejects_blank_event_type() {
        let events = vec![EventData::new("Created", b"{}".to_vec()), EventData::new("", Vec::<u8>::new())];

        let result = validate_append("s1", 0, &events);

        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_event_data_builder_collects_metadata() {
        let event = EventData::new("Created", b"x".to_vec())
            .with_metadata("correlation_id", "c-1")
            .with_metadata("causation_id", "c-0");

        assert_eq!(event.metadata.len(), 2);
        assert_eq!(event.metadata["correlation_id"], "c-1");
    }
}
