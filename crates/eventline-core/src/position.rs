//! Partitions, commit positions and continuation tokens.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Identifies a shard of the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Maps a stream to its log partition.
///
/// The first four bytes of the SHA-256 digest of the stream id, read big
/// endian, modulo the partition count. Stable across processes and releases,
/// so every event of a stream lands in the same partition.
#[must_use]
pub fn partition_for(stream_id: &str, partition_count: NonZeroU32) -> PartitionId {
    let digest = Sha256::digest(stream_id.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    PartitionId(prefix % partition_count.get())
}

/// Enumerates every partition of a log with `partition_count` shards.
pub fn all_partitions(partition_count: NonZeroU32) -> impl Iterator<Item = PartitionId> {
    (0..partition_count.get()).map(PartitionId)
}

/// Store-assigned ordering marker.
///
/// Ordered by `transaction` first, then `sequence`. Only meaningful for
/// resuming a scan; applications must not derive business ordering from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitPosition {
    /// Identifier of the writing transaction.
    pub transaction: u64,
    /// Store-wide insertion sequence.
    pub sequence: u64,
}

impl CommitPosition {
    /// Creates a commit position.
    #[must_use]
    pub fn new(transaction: u64, sequence: u64) -> Self {
        Self {
            transaction,
            sequence,
        }
    }

    /// Encodes this position as a continuation token.
    #[must_use]
    pub fn to_token(self) -> ContinuationToken {
        ContinuationToken(format!("{}:{}", self.transaction, self.sequence))
    }
}

impl fmt::Display for CommitPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction, self.sequence)
    }
}

/// Opaque, store-specific resume marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(pub String);

impl ContinuationToken {
    /// Returns the raw token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes a token produced by [`CommitPosition::to_token`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Fatal` if the token is malformed; a corrupt
    /// checkpoint cannot be resumed from safely.
    pub fn to_commit_position(&self) -> Result<CommitPosition, StoreError> {
        let malformed = || StoreError::Fatal(format!("malformed continuation token: {:?}", self.0));
        let (transaction, sequence) = self.0.split_once(':').ok_or_else(malformed)?;
        Ok(CommitPosition {
            transaction: transaction.parse().map_err(|_| malformed())?,
            sequence: sequence.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a partition scan resumes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogPosition {
    /// Start-of-log sentinel: nothing processed yet.
    #[default]
    Start,
    /// Everything up to and including the token has been processed.
    After(ContinuationToken),
}

impl LogPosition {
    /// Builds a position from an optional persisted token.
    #[must_use]
    pub fn from_token(token: Option<String>) -> Self {
        token.map_or(Self::Start, |t| Self::After(ContinuationToken(t)))
    }

    /// Returns the token, or `None` for the start-of-log sentinel.
    #[must_use]
    pub fn token(&self) -> Option<&ContinuationToken> {
        match self {
            Self::Start => None,
            Self::After(token) => Some(token),
        }
    }

    /// Decodes the commit position the scan resumes after.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Fatal` if the token is malformed.
    pub fn commit_position(&self) -> Result<Option<CommitPosition>, StoreError> {
        self.token().map(ContinuationToken::to_commit_position).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn four() -> NonZeroU32 {
        NonZeroU32::new(4).unwrap()
    }

    #[test]
    fn test_partition_for_is_stable_and_in_range() {
        let first = partition_for("order-17", four());
        let second = partition_for("order-17", four());

        assert_eq!(first, second);
        assert!(first.0 < 4);
    }

    #[test]
    fn test_partition_for_single_partition_is_always_zero() {
        let one = NonZeroU32::new(1).unwrap();

        assert_eq!(partition_for("a", one), PartitionId(0));
        assert_eq!(partition_for("zzz", one), PartitionId(0));
    }

    #[test]
    fn test_partition_for_spreads_streams() {
        let used: std::collections::BTreeSet<_> = (0..64)
            .map(|i| partition_for(&format!("stream-{i}"), four()))
            .collect();

        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_commit_positions_order_by_transaction_first() {
        let early_tx = CommitPosition::new(10, 99);
        let late_tx = CommitPosition::new(11, 5);

        assert!(early_tx < late_tx);
    }

    #[test]
    fn test_token_decodes_to_commit_position() {
        let token = CommitPosition::new(742, 18).to_token();

        assert_eq!(token.as_str(), "742:18");
        assert_eq!(token.to_commit_position().unwrap(), CommitPosition::new(742, 18));
    }

    #[test]
    fn test_malformed_token_is_fatal() {
        for raw in ["", "12", "a:b", "1:2:3"] {
            let result = ContinuationToken(raw.to_owned()).to_commit_position();
            assert!(matches!(result, Err(StoreError::Fatal(_))), "token {raw:?}");
        }
    }

    #[test]
    fn test_start_position_has_no_commit_position() {
        assert_eq!(LogPosition::Start.commit_position().unwrap(), None);
        assert_eq!(LogPosition::from_token(None), LogPosition::Start);
    }
}
