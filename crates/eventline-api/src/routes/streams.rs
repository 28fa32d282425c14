//! Routes for appending to, reading and deleting streams.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use eventline_core::error::StoreError;
use eventline_core::event::{EventData, EventRecord, Metadata};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on events returned by one read.
pub const MAX_READ_COUNT: usize = 1000;

/// One event to append.
#[derive(Debug, Deserialize)]
pub struct NewEvent {
    /// Client-chosen id for deduplication; generated when absent.
    pub event_id: Option<Uuid>,
    /// Event type name.
    pub event_type: String,
    /// Base64-encoded payload bytes.
    pub payload: String,
    /// Optional string metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// Request body for `POST /{stream_id}/events`.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// Offset the first event must land on, i.e. the stream length the
    /// writer last observed.
    pub expected_offset: i64,
    /// Events to append, in order.
    pub events: Vec<NewEvent>,
}

/// Response body of a successful append.
#[derive(Debug, Serialize)]
pub struct AppendResponse {
    /// Offset of the first appended event.
    pub first_offset: i64,
    /// Stream length after the append.
    pub next_offset: i64,
    /// Ids of the appended events, in order.
    pub event_ids: Vec<Uuid>,
}

/// Query parameters of `GET /{stream_id}/events`.
#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    /// First offset to return.
    #[serde(default)]
    pub from: i64,
    /// Maximum number of events, capped at [`MAX_READ_COUNT`].
    pub max: Option<usize>,
}

/// A stored event as returned over HTTP.
#[derive(Debug, Serialize)]
pub struct EventView {
    /// Offset within the stream.
    pub offset: i64,
    /// Event id.
    pub event_id: Uuid,
    /// Event type name.
    pub event_type: String,
    /// Base64-encoded payload bytes.
    pub payload: String,
    /// String metadata.
    pub metadata: Metadata,
    /// Time the event was appended.
    pub timestamp: DateTime<Utc>,
    /// Log partition of the stream.
    pub partition_id: u32,
    /// Commit position token.
    pub commit_position: String,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        Self {
            offset: record.offset,
            event_id: record.event_id,
            event_type: record.event_type,
            payload: STANDARD.encode(&record.payload),
            metadata: record.metadata,
            timestamp: record.timestamp,
            partition_id: record.partition_id.0,
            commit_position: record.commit_position.to_token().0,
        }
    }
}

/// Response body of a stream read.
#[derive(Debug, Serialize)]
pub struct ReadResponse {
    /// The stream read.
    pub stream_id: String,
    /// Events in offset order.
    pub events: Vec<EventView>,
}

/// Response body of a stream deletion.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// The stream deleted.
    pub stream_id: String,
    /// Number of events removed; zero when the stream did not exist.
    pub deleted: u64,
}

fn to_event_data(index: usize, event: NewEvent) -> Result<EventData, StoreError> {
    let payload = STANDARD.decode(event.payload.as_bytes()).map_err(|err| {
        StoreError::Validation(format!("event {index}: payload is not valid base64: {err}"))
    })?;
    let mut data = EventData::new(event.event_type, payload);
    if let Some(event_id) = event.event_id {
        data.event_id = event_id;
    }
    data.metadata = event.metadata;
    Ok(data)
}

/// POST /{stream_id}/events
#[instrument(skip(state, request), fields(expected_offset = request.expected_offset, event_count = request.events.len()))]
async fn append_events(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Json(request): Json<AppendRequest>,
) -> Result<Json<AppendResponse>, ApiError> {
    let events = request
        .events
        .into_iter()
        .enumerate()
        .map(|(index, event)| to_event_data(index, event))
        .collect::<Result<Vec<_>, _>>()?;

    // Dropping the request future aborts the append; nothing fires the token.
    let cancel = CancellationToken::new();
    let result = state
        .stream_log
        .append(&stream_id, request.expected_offset, &events, &cancel)
        .await?;

    info!(next_offset = result.next_offset, "events appended");
    Ok(Json(AppendResponse {
        first_offset: result.first_offset,
        next_offset: result.next_offset,
        event_ids: result.event_ids,
    }))
}

/// GET /{stream_id}/events
#[instrument(skip(state, query), fields(from = query.from, max = query.max))]
async fn read_events(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Result<Json<ReadResponse>, ApiError> {
    let max = query.max.unwrap_or(MAX_READ_COUNT).min(MAX_READ_COUNT);
    let records: Vec<EventRecord> = state
        .stream_log
        .read_stream(&stream_id, query.from, max)
        .try_collect()
        .await?;

    Ok(Json(ReadResponse {
        events: records.into_iter().map(EventView::from).collect(),
        stream_id,
    }))
}

/// DELETE /{stream_id}
#[instrument(skip(state))]
async fn delete_stream(
    State(state): State<AppState>,
    Path(stream_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state
        .stream_log
        .delete_stream(&stream_id, &CancellationToken::new())
        .await?;

    info!(deleted, "stream deleted");
    Ok(Json(DeleteResponse { stream_id, deleted }))
}

/// Returns the router for stream operations.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{stream_id}/events", post(append_events).get(read_events))
        .route("/{stream_id}", delete(delete_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_event_data_decodes_payload_and_keeps_id() {
        let event_id = Uuid::new_v4();
        let event = NewEvent {
            event_id: Some(event_id),
            event_type: "Deposited".into(),
            payload: STANDARD.encode(b"{\"amount\":5}"),
            metadata: Metadata::from([("source".to_string(), "atm".to_string())]),
        };

        let data = to_event_data(0, event).unwrap();

        assert_eq!(data.event_id, event_id);
        assert_eq!(data.payload, b"{\"amount\":5}".to_vec());
        assert_eq!(data.metadata.get("source").map(String::as_str), Some("atm"));
    }

    #[test]
    fn test_to_event_data_rejects_invalid_base64() {
        let event = NewEvent {
            event_id: None,
            event_type: "Deposited".into(),
            payload: "not base64!".into(),
            metadata: Metadata::new(),
        };

        match to_event_data(3, event) {
            Err(StoreError::Validation(message)) => assert!(message.starts_with("event 3:")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
