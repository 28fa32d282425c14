//! Lease/checkpoint store abstraction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::position::{ContinuationToken, LogPosition, PartitionId};

/// Persisted cursor of one subscriber over one log partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Subscriber (partition key of the checkpoint collection).
    pub subscriber_id: String,
    /// Log partition being tracked.
    pub partition_id: PartitionId,
    /// Last processed position.
    pub position: LogPosition,
    /// Current lease holder, if any.
    pub lease_owner: Option<String>,
    /// Expiry of the current lease, if any.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Result of a lease acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// The caller now holds the lease until `expires_at`.
    Granted {
        /// Expiry of the granted lease.
        expires_at: DateTime<Utc>,
    },
    /// Another owner holds an unexpired lease.
    Denied {
        /// The current holder.
        holder: String,
        /// When the holder's lease lapses.
        expires_at: DateTime<Utc>,
    },
}

impl LeaseDecision {
    /// Returns `true` if the lease was granted.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// Computes the expiry of a lease taken at `now` for `ttl`.
///
/// # Errors
///
/// Returns `StoreError::Validation` if the ttl does not fit a timestamp.
pub fn lease_expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| StoreError::Validation(format!("lease ttl {ttl:?} is out of range")))
}

/// Store trait for per-subscriber cursors and best-effort consumer leases.
///
/// Each subscriber owns its own partition key and the subscription engine
/// serializes its own writes, so saves are last-writer-wins.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Loads the last saved position, or `LogPosition::Start` if none.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the checkpoint cannot be read.
    async fn load_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
    ) -> Result<LogPosition, StoreError>;

    /// Persists the position after a processed batch.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the checkpoint cannot be written.
    async fn save_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        token: &ContinuationToken,
    ) -> Result<(), StoreError>;

    /// Claims or renews the lease over a partition, creating the checkpoint
    /// record if it does not exist yet.
    ///
    /// Denied only while a different owner holds an unexpired lease. Clock
    /// skew between owners makes this best-effort; consumers deduplicate by
    /// event id.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the lease cannot be read or written.
    async fn acquire_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseDecision, StoreError>;

    /// Gives up a lease held by `owner_id`. No-op if someone else holds it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the lease cannot be written.
    async fn release_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
    ) -> Result<(), StoreError>;

    /// Lists every checkpoint of a subscriber, ordered by partition.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the checkpoints cannot be read.
    async fn list_checkpoints(&self, subscriber_id: &str)
    -> Result<Vec<CheckpointRecord>, StoreError>;

    /// Deletes every checkpoint of a torn-down subscriber.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the deletion fails.
    async fn delete_subscriber(&self, subscriber_id: &str) -> Result<u64, StoreError>;
}
