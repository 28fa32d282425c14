//! In-memory `CheckpointStore` that records every saved checkpoint.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventline_core::checkpoint::{CheckpointRecord, CheckpointStore, LeaseDecision, lease_expiry};
use eventline_core::clock::{Clock, SystemClock};
use eventline_core::error::StoreError;
use eventline_core::position::{ContinuationToken, LogPosition, PartitionId};

type SavedCheckpoint = (String, PartitionId, ContinuationToken);

/// A checkpoint store held in memory.
///
/// Lease semantics match the PostgreSQL backend: granted to a free row, the
/// current owner, or over an expired lease. Every `save_checkpoint` call is
/// also appended to a log so tests can assert on checkpoint progression.
pub struct InMemoryCheckpointStore {
    clock: Arc<dyn Clock>,
    rows: Mutex<BTreeMap<(String, PartitionId), CheckpointRecord>>,
    saves: Mutex<Vec<SavedCheckpoint>>,
}

impl std::fmt::Debug for InMemoryCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCheckpointStore")
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCheckpointStore {
    /// Creates an empty store stamping `updated_at` from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            rows: Mutex::new(BTreeMap::new()),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of every `save_checkpoint` call, in call order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_checkpoints(&self) -> Vec<SavedCheckpoint> {
        self.saves.lock().unwrap().clone()
    }

    fn blank_record(&self, subscriber_id: &str, partition_id: PartitionId) -> CheckpointRecord {
        CheckpointRecord {
            subscriber_id: subscriber_id.to_owned(),
            partition_id,
            position: LogPosition::Start,
            lease_owner: None,
            lease_expires_at: None,
            updated_at: self.clock.now(),
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
    ) -> Result<LogPosition, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(subscriber_id.to_owned(), partition_id))
            .map_or(LogPosition::Start, |record| record.position.clone()))
    }

    async fn save_checkpoint(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        token: &ContinuationToken,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        {
            let mut rows = self.rows.lock().unwrap();
            let record = rows
                .entry((subscriber_id.to_owned(), partition_id))
                .or_insert_with(|| self.blank_record(subscriber_id, partition_id));
            record.position = LogPosition::After(token.clone());
            record.updated_at = now;
        }
        self.saves
            .lock()
            .unwrap()
            .push((subscriber_id.to_owned(), partition_id, token.clone()));
        Ok(())
    }

    async fn acquire_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseDecision, StoreError> {
        let expires_at = lease_expiry(now, ttl)?;
        let mut rows = self.rows.lock().unwrap();
        let record = rows
            .entry((subscriber_id.to_owned(), partition_id))
            .or_insert_with(|| self.blank_record(subscriber_id, partition_id));

        if let (Some(holder), Some(held_until)) = (&record.lease_owner, record.lease_expires_at) {
            if holder != owner_id && held_until > now {
                return Ok(LeaseDecision::Denied {
                    holder: holder.clone(),
                    expires_at: held_until,
                });
            }
        }

        record.lease_owner = Some(owner_id.to_owned());
        record.lease_expires_at = Some(expires_at);
        record.updated_at = now;
        Ok(LeaseDecision::Granted { expires_at })
    }

    async fn release_lease(
        &self,
        subscriber_id: &str,
        partition_id: PartitionId,
        owner_id: &str,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(record) = rows.get_mut(&(subscriber_id.to_owned(), partition_id)) {
            if record.lease_owner.as_deref() == Some(owner_id) {
                record.lease_owner = None;
                record.lease_expires_at = None;
            }
        }
        Ok(())
    }

    async fn list_checkpoints(
        &self,
        subscriber_id: &str,
    ) -> Result<Vec<CheckpointRecord>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|record| record.subscriber_id == subscriber_id)
            .cloned()
            .collect())
    }

    async fn delete_subscriber(&self, subscriber_id: &str) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|(subscriber, _), _| subscriber != subscriber_id);
        Ok((before - rows.len()) as u64)
    }
}
