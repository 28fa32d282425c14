//! Event store database schema and idempotent provisioning.

use sqlx::PgPool;
use tracing::{debug, info, instrument};

use eventline_core::error::StoreError;

use crate::error::{classify, is_unique_violation};

/// SQL to create the events table.
///
/// The primary key on `(stream_id, stream_offset)` is the only
/// concurrency-control mechanism of the store. `transaction_id` and
/// `commit_sequence` together form the commit position scanned by
/// subscriptions.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS event_records (
    stream_id       TEXT        NOT NULL,
    stream_offset   BIGINT      NOT NULL CHECK (stream_offset >= 0),
    partition_id    INTEGER     NOT NULL CHECK (partition_id >= 0),
    event_id        UUID        NOT NULL,
    event_type      TEXT        NOT NULL,
    payload         BYTEA       NOT NULL,
    metadata        JSONB       NOT NULL DEFAULT '{}'::jsonb,
    created_at      TIMESTAMPTZ NOT NULL,
    transaction_id  XID8        NOT NULL DEFAULT pg_current_xact_id(),
    commit_sequence BIGINT      GENERATED ALWAYS AS IDENTITY,
    CONSTRAINT event_records_stream_offset_key PRIMARY KEY (stream_id, stream_offset)
)
";

/// SQL to create the per-partition scan index.
pub const CREATE_EVENTS_PARTITION_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_event_records_partition_position
    ON event_records (partition_id, transaction_id, commit_sequence)
";

/// SQL to create the checkpoints table.
pub const CREATE_CHECKPOINTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS subscription_checkpoints (
    subscriber_id      TEXT        NOT NULL,
    partition_id       INTEGER     NOT NULL CHECK (partition_id >= 0),
    continuation_token TEXT,
    lease_owner        TEXT,
    lease_expires_at   TIMESTAMPTZ,
    updated_at         TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (subscriber_id, partition_id)
)
";

/// Statements run by [`provision`], in order.
pub const PROVISIONING_STATEMENTS: &[&str] = &[
    CREATE_EVENTS_TABLE,
    CREATE_EVENTS_PARTITION_INDEX,
    CREATE_CHECKPOINTS_TABLE,
];

/// Creates both tables and the scan index if they do not exist.
///
/// Safe to run repeatedly and from several processes at once: a concurrent
/// creator racing on the catalog is treated as success.
///
/// # Errors
///
/// Returns `StoreError` if a statement fails for any other reason.
#[instrument(skip(pool))]
pub async fn provision(pool: &PgPool) -> Result<(), StoreError> {
    for statement in PROVISIONING_STATEMENTS {
        match sqlx::query(statement).execute(pool).await {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                debug!("schema object created concurrently, continuing");
            }
            Err(err) => return Err(classify(err)),
        }
    }
    info!("event store schema provisioned");
    Ok(())
}
