//! `PostgreSQL` implementation of the `CheckpointStore` trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, instrument};

use eventline_core::checkpoint::{CheckpointRecord, CheckpointStore, LeaseDecision, lease_expiry};
use eventline_core::clock::Clock;
use eventline_core::error::StoreError;
use eventline_core::position::{ContinuationToken, LogPosition, PartitionId};
use eventline_core::retry::RetryPolicy;

use crate::error::classify;

const SELECT_TOKEN: &str = r"
SELECT continuation_token FROM subscription_checkpoints
WHERE subscriber_id = $1 AND partition_id = $2
";

const UPSERT_TOKEN: &str = r"
INSERT INTO subscription_checkpoints (subscriber_id, partition_id, continuation_token, updated_at)
VALUES ($1, $2, $3, $4)
ON CONFLICT (subscriber_id, partition_id) DO UPDATE
SET continuation_token = EXCLUDED.continuation_token,
    updated_at = EXCLUDED.updated_at
";

/// Claims the lease in one statement. The upsert only updates when the row is
/// free, already ours, or expired; otherwise the second branch reports the
/// current holder from the pre-statement snapshot.
const ACQUIRE_LEASE: &str = r"
WITH claimed AS (
    INSERT INTO subscription_checkpoints
        (subscriber_id, partition_id, continuation_token, lease_owner, lease_expires_at, updated_at)
    VALUES ($1, $2, NULL, $3, $4, $5)
    ON CONFLICT (subscriber_id, partition_id) DO UPDATE
    SET lease_owner = EXCLUDED.lease_owner,
        lease_expires_at = EXCLUDED.lease_expires_at,
        updated_at = EXCLUDED.updated_at
    WHERE subscription_checkpoints.lease_owner IS NULL
       OR subscription_checkpoints.lease_owner = EXCLUDED.lease_owner
       OR subscription_checkpoints.lease_expires_at IS NULL
       OR subscription_checkpoints.lease_expires_at <= $5
    RETURNING lease_owner, lease_expires_at
)
SELECT lease_owner, lease_expires_at, TRUE AS granted FROM claimed
UNION ALL
SELECT lease_owner, lease_expires_at, FALSE AS granted
FROM subscription_checkpoints
WHERE subscriber_id = $1 AND partition_id = $2
  AND NOT EXISTS (SELECT 1 FROM claimed)
";

const RELEASE_LEASE: &str = r"
UPDATE subscription_checkpoints
SET lease_owner = NULL, lease_expires_at = NULL, updated_at = $4
WHERE subscriber_id = $1 AND partition_id = $2 AND lease_owner = $3
";

const LIST_CHECKPOINTS: &str = r"
SELECT subscriber_id, partition_id, continuation_token, lease_owner, lease_expires_at, updated_at
FROM subscription_checkpoints
WHERE subscriber_id = $1
ORDER BY partition_id
";

const DELETE_SUBSCRIBER: &str = "DELETE FROM subscription_checkpoints WHERE subscriber_id = $1";

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    granted: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    subscriber_id: String,
    partition_id: i32,
    continuation_token: Option<String>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CheckpointRow> for CheckpointRecord {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let partition_id = u32::try_from(row.partition_id).map_err(|_| {
            StoreError::Fatal(format!(
                "corrupt checkpoint for {}: partition id {}",
                row.subscriber_id, row.partition_id
            ))
        })?;
        Ok(Self {
            subscriber_id: row.subscriber_id,
            partition_id: PartitionId(partition_id),
            position: LogPosition::from_token(row.continuation_token),
            lease_owner: row.lease_owner,
            lease_expires_at: row.lease_expires_at,
            updated_at: row.updated_at,
        })
    }
}

fn partition_key(partition_id: PartitionId) -> Result<i32, StoreError> {
    i32::try_from(partition_id.0)
        .map_err(|_| StoreError::Validation(format!("partition id {partition_id} out of range")))
}

/// PostgreSQL-backed checkpoint and lease store.
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for PgCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgCheckpointStore")
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PgCheckpointStore {
    /// Creates a new `PgCheckpointStore`.
    #[must_use]
    pub fn new(pool: PgPool, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { pool, retry, clock }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self), fields(%partition_id))]
    async fn load_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
    ) -> Result<LogPosition, StoreError> {
        let key = partition_key(partition_id)?;
        let token: Option<Option<String>> = self
            .retry
            .run("load_checkpoint", |_| async move {
                sqlx::query_scalar(SELECT_TOKEN)
                    .bind(subscriber_id)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;
        Ok(LogPosition::from_token(token.flatten()))
    }

    #[instrument(skip(self), fields(%partition_id, %token))]
    async fn save_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        token: &ContinuationToken,
    ) -> Result<(), StoreError> {
        let key = partition_key(partition_id)?;
        let now = self.clock.now();
        self.retry
            .run("save_checkpoint", |_| async move {
                sqlx::query(UPSERT_TOKEN)
                    .bind(subscriber_id)
                    .bind(key)
                    .bind(token.as_str())
                    .bind(now)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;
        debug!("checkpoint saved");
        Ok(())
    }

    #[instrument(skip(self, ttl, now), fields(%partition_id))]
    async fn acquire_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseDecision, StoreError> {
        let key = partition_key(partition_id)?;
        let expires_at = lease_expiry(now, ttl)?;
        let row: Option<LeaseRow> = self
            .retry
            .run("acquire_lease", |_| async move {
                sqlx::query_as(ACQUIRE_LEASE)
                    .bind(subscriber_id)
                    .bind(key)
                    .bind(owner_id)
                    .bind(expires_at)
                    .bind(now)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;

        match row {
            Some(LeaseRow {
                granted: true,
                lease_expires_at: Some(expires_at),
                ..
            }) => Ok(LeaseDecision::Granted { expires_at }),
            Some(LeaseRow {
                granted: false,
                lease_owner: Some(holder),
                lease_expires_at: Some(expires_at),
            }) => {
                debug!(%holder, "lease held by another owner");
                Ok(LeaseDecision::Denied { holder, expires_at })
            }
            // The row was deleted or released between the claim and the
            // report; a retry settles it.
            _ => Err(StoreError::Transient(format!(
                "lease on {subscriber_id}/{partition_id} changed concurrently"
            ))),
        }
    }

    #[instrument(skip(self), fields(%partition_id))]
    async fn release_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
    ) -> Result<(), StoreError> {
        let key = partition_key(partition_id)?;
        let now = self.clock.now();
        self.retry
            .run("release_lease", |_| async move {
                sqlx::query(RELEASE_LEASE)
                    .bind(subscriber_id)
                    .bind(key)
                    .bind(owner_id)
                    .bind(now)
                    .execute(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_checkpoints(
        &self,
        subscriber_id: &str,
    ) -> Result<Vec<CheckpointRecord>, StoreError> {
        let rows: Vec<CheckpointRow> = self
            .retry
            .run("list_checkpoints", |_| async move {
                sqlx::query_as(LIST_CHECKPOINTS)
                    .bind(subscriber_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(classify)
            })
            .await?;
        rows.into_iter().map(CheckpointRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn delete_subscriber(&self, subscriber_id: &str) -> Result<u64, StoreError> {
        self.retry
            .run("delete_subscriber", |_| async move {
                sqlx::query(DELETE_SUBSCRIBER)
                    .bind(subscriber_id)
                    .execute(&self.pool)
                    .await
                    .map(|done| done.rows_affected())
                    .map_err(classify)
            })
            .await
    }
}
