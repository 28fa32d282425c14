//! `PostgreSQL` implementation of the `StreamLog` trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::TryFutureExt;
use futures::stream::{self, TryStreamExt};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use eventline_core::clock::Clock;
use eventline_core::error::StoreError;
use eventline_core::event::{AppendResult, EventData, EventRecord, validate_append, validate_stream_id};
use eventline_core::position::partition_for;
use eventline_core::stream_log::{EventStream, StreamLog};

use crate::codec::{self, EventRow, NewEventRow};
use crate::config::EventStoreConfig;
use crate::error::{classify, is_unique_violation};

const SELECT_STREAM_LENGTH: &str =
    "SELECT COALESCE(MAX(stream_offset) + 1, 0) FROM event_records WHERE stream_id = $1";

const SELECT_STREAM_PAGE: &str = r"
SELECT stream_id, stream_offset, partition_id, event_id, event_type, payload, metadata,
       created_at, transaction_id::text::bigint AS transaction_id, commit_sequence
FROM event_records
WHERE stream_id = $1 AND stream_offset >= $2
ORDER BY stream_offset
LIMIT $3
";

const SELECT_EVENT_IDS_FROM: &str = r"
SELECT event_id FROM event_records
WHERE stream_id = $1 AND stream_offset >= $2
ORDER BY stream_offset
LIMIT $3
";

const DELETE_STREAM: &str = "DELETE FROM event_records WHERE stream_id = $1";

/// Runs `fut` unless `cancel` fires first. Dropping the future aborts the
/// in-flight statement; an open transaction rolls back when dropped.
async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output, StoreError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StoreError::Cancelled),
        output = fut => Ok(output),
    }
}

/// `true` when `stored` holds exactly the ids of `events`, in order. An empty
/// batch never counts as committed.
fn same_event_ids(stored: &[Uuid], events: &[EventData]) -> bool {
    !events.is_empty() && stored.iter().copied().eq(events.iter().map(|e| e.event_id))
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// PostgreSQL-backed stream log.
#[derive(Clone)]
pub struct PgStreamLog {
    pool: PgPool,
    config: EventStoreConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PgStreamLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStreamLog")
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PgStreamLog {
    /// Creates a new `PgStreamLog`.
    #[must_use]
    pub fn new(pool: PgPool, config: EventStoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            config,
            clock,
        }
    }

    async fn read_length(&self, stream_id: &str) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(SELECT_STREAM_LENGTH)
            .bind(stream_id)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)
    }

    /// One append attempt inside its own transaction.
    async fn try_append(
        &self,
        stream_id: &str,
        expected_offset: i64,
        rows: &[NewEventRow],
        cancel: &CancellationToken,
    ) -> Result<(), StoreError> {
        let mut tx = until_cancelled(cancel, self.pool.begin())
            .await?
            .map_err(classify)?;

        let length: i64 = until_cancelled(
            cancel,
            sqlx::query_scalar(SELECT_STREAM_LENGTH)
                .bind(stream_id)
                .fetch_one(&mut *tx),
        )
        .await?
        .map_err(classify)?;

        if expected_offset > length {
            return Err(StoreError::OffsetGap {
                stream_id: stream_id.to_owned(),
                expected: expected_offset,
                actual: length,
            });
        }
        if expected_offset < length {
            return Err(StoreError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected: expected_offset,
                actual: length,
            });
        }
        if rows.is_empty() {
            return Ok(());
        }

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO event_records \
             (stream_id, stream_offset, partition_id, event_id, event_type, payload, metadata, created_at) ",
        );
        insert.push_values(rows, |mut values, row| {
            values
                .push_bind(row.stream_id.clone())
                .push_bind(row.stream_offset)
                .push_bind(row.partition_id)
                .push_bind(row.event_id)
                .push_bind(row.event_type.clone())
                .push_bind(row.payload.clone())
                .push_bind(row.metadata.clone())
                .push_bind(row.created_at);
        });

        let inserted = until_cancelled(cancel, insert.build().execute(&mut *tx)).await?;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                // A concurrent writer committed one of our offsets first.
                drop(tx);
                let actual = self.read_length(stream_id).await?;
                return Err(StoreError::ConcurrencyConflict {
                    stream_id: stream_id.to_owned(),
                    expected: expected_offset,
                    actual,
                });
            }
            Err(err) => return Err(classify(err)),
        }

        // Past this point the commit runs to completion even if `cancel`
        // fires, so a batch is either fully visible or absent.
        tx.commit().await.map_err(classify)
    }

    /// Checks whether `events` already sit at `expected_offset`, i.e. an
    /// earlier attempt whose outcome was lost to a transient error did commit.
    ///
    /// # Errors
    ///
    /// Returns the classified database error if the lookup fails.
    pub async fn batch_already_committed(
        &self,
        stream_id: &str,
        expected_offset: i64,
        events: &[EventData],
    ) -> Result<bool, StoreError> {
        let stored: Vec<Uuid> = sqlx::query_scalar(SELECT_EVENT_IDS_FROM)
            .bind(stream_id)
            .bind(expected_offset)
            .bind(to_i64(events.len()))
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;
        Ok(same_event_ids(&stored, events))
    }

    async fn fetch_page(
        &self,
        stream_id: &str,
        from_offset: i64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, StoreError> {
        let rows: Vec<EventRow> = self
            .config
            .retry
            .run("read_stream", |_| {
                sqlx::query_as::<_, EventRow>(SELECT_STREAM_PAGE)
                    .bind(stream_id)
                    .bind(from_offset)
                    .bind(to_i64(limit))
                    .fetch_all(&self.pool)
                    .map_err(classify)
            })
            .await?;
        rows.into_iter().map(codec::decode).collect()
    }
}

#[async_trait]
impl StreamLog for PgStreamLog {
    #[instrument(skip(self, events, cancel), fields(event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &str,
        expected_offset: i64,
        events: &[EventData],
        cancel: &CancellationToken,
    ) -> Result<AppendResult, StoreError> {
        validate_append(stream_id, expected_offset, events)?;

        let partition = partition_for(stream_id, self.config.partition_count);
        let created_at = self.clock.now();
        let rows = (expected_offset..)
            .zip(events)
            .map(|(offset, event)| codec::encode(stream_id, offset, event, partition, created_at))
            .collect::<Result<Vec<_>, _>>()?;

        let outcome = self
            .config
            .retry
            .run_cancellable("append", cancel, |attempt| {
                let rows = &rows;
                async move {
                    match self.try_append(stream_id, expected_offset, rows, cancel).await {
                        Err(conflict @ StoreError::ConcurrencyConflict { .. }) if attempt > 0 => {
                            if self
                                .batch_already_committed(stream_id, expected_offset, events)
                                .await?
                            {
                                warn!(attempt, "append committed by an earlier attempt");
                                Ok(())
                            } else {
                                Err(conflict)
                            }
                        }
                        other => other,
                    }
                }
            })
            .await;

        if let Err(err) = &outcome {
            debug!(error = %err, "append rejected");
        }
        outcome?;

        let next_offset = expected_offset + to_i64(events.len());
        debug!(%partition, next_offset, "append committed");
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
            return Box::pin(stream::iter([Err::<EventRecord, _>(StoreError::Validation(
                format!("from offset must not be negative, got {from_offset}"),
            ))]));
        }

        let page_size = self.config.page_size.get();
        let pages = stream::try_unfold(
            (from_offset, max_count),
            move |(next_offset, remaining)| async move {
                if remaining == 0 {
                    return Ok::<_, StoreError>(None);
                }
                let limit = remaining.min(page_size);
                let records = self.fetch_page(stream_id, next_offset, limit).await?;
                let Some(last) = records.last() else {
                    return Ok(None);
                };
                let after_last = last.offset + 1;
                let remaining = if records.len() < limit {
                    0
                } else {
                    remaining - records.len()
                };
                let page = stream::iter(records.into_iter().map(Ok::<_, StoreError>));
                Ok(Some((page, (after_last, remaining))))
            },
        );
        Box::pin(pages.try_flatten())
    }

    #[instrument(skip(self))]
    async fn stream_length(&self, stream_id: &str) -> Result<i64, StoreError> {
        validate_stream_id(stream_id)?;
        self.config
            .retry
            .run("stream_length", |_| self.read_length(stream_id))
            .await
    }

    #[instrument(skip(self, cancel))]
    async fn delete_stream(
        &self,
        stream_id: &str,
        cancel: &CancellationToken,
    ) -> Result<u64, StoreError> {
        validate_stream_id(stream_id)?;
        let deleted = self
            .config
            .retry
            .run_cancellable("delete_stream", cancel, |_| async move {
                until_cancelled(
                    cancel,
                    sqlx::query(DELETE_STREAM).bind(stream_id).execute(&self.pool),
                )
                .await?
                .map(|done| done.rows_affected())
                .map_err(classify)
            })
            .await?;
        debug!(deleted, "stream deleted");
        Ok(deleted)
    }
}
