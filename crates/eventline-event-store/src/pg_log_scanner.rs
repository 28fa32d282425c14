//! `PostgreSQL` implementation of the `LogScanner` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};

use eventline_core::error::StoreError;
use eventline_core::position::{CommitPosition, LogPosition, PartitionId, all_partitions};
use eventline_core::scanner::{LogScanner, ScanBatch};

use crate::codec::{self, EventRow};
use crate::config::EventStoreConfig;
use crate::error::classify;

/// Rows strictly after `($2, $3)` in commit order, limited to transactions
/// older than every transaction still in progress. A writer that started
/// earlier but commits later can therefore never slip in behind a position
/// this query has already returned.
const SCAN_PARTITION: &str = r"
SELECT stream_id, stream_offset, partition_id, event_id, event_type, payload, metadata,
       created_at, transaction_id::text::bigint AS transaction_id, commit_sequence
FROM event_records
WHERE partition_id = $1
  AND transaction_id < pg_snapshot_xmin(pg_current_snapshot())
  AND (transaction_id, commit_sequence) > ($2::text::xid8, $3)
ORDER BY transaction_id, commit_sequence
LIMIT $4
";

/// PostgreSQL-backed change feed over `event_records`.
#[derive(Debug, Clone)]
pub struct PgLogScanner {
    pool: PgPool,
    config: EventStoreConfig,
}

impl PgLogScanner {
    /// Creates a new `PgLogScanner`.
    #[must_use]
    pub fn new(pool: PgPool, config: EventStoreConfig) -> Self {
        Self { pool, config }
    }
}

#[async_trait]
impl LogScanner for PgLogScanner {
    fn partitions(&self) -> Vec<PartitionId> {
        all_partitions(self.config.partition_count).collect()
    }

    #[instrument(skip(self, from), fields(%partition))]
    async fn scan(
        &self,
        partition: PartitionId,
        from: &LogPosition,
        max_count: usize,
    ) -> Result<ScanBatch, StoreError> {
        let after = from.commit_position()?.unwrap_or(CommitPosition::new(0, 0));
        let partition_key = i32::try_from(partition.0)
            .map_err(|_| StoreError::Validation(format!("partition id {partition} out of range")))?;
        let after_sequence = i64::try_from(after.sequence)
            .map_err(|_| StoreError::Fatal(format!("commit sequence {} out of range", after.sequence)))?;
        // One extra row tells whether anything remains beyond this batch.
        let limit = i64::try_from(max_count.saturating_add(1)).unwrap_or(i64::MAX);

        let rows: Vec<EventRow> = sqlx::query_as(SCAN_PARTITION)
            .bind(partition_key)
            .bind(after.transaction.to_string())
            .bind(after_sequence)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        let at_end = rows.len() <= max_count;
        let records = rows
            .into_iter()
            .take(max_count)
            .map(codec::decode)
            .collect::<Result<Vec<_>, _>>()?;
        let next = records.last().map_or_else(
            || from.clone(),
            |record| LogPosition::After(record.commit_position.to_token()),
        );

        debug!(fetched = records.len(), at_end, "partition scanned");
        Ok(ScanBatch {
            records,
            next,
            at_end,
        })
    }
}
