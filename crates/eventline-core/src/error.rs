//! Store error taxonomy.
//!
//! Every backend classifies its native failures into [`StoreError`] at the
//! store boundary; callers above never see raw storage-engine error codes.

use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// One of the offsets assigned by an append is already committed.
    ///
    /// Recoverable: re-read the stream length and retry with `actual` as the
    /// expected offset.
    #[error("concurrency conflict on stream {stream_id}: expected offset {expected}, stream length is {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: String,
        /// The expected offset supplied by the caller.
        expected: i64,
        /// The stream length observed after the failure.
        actual: i64,
    },

    /// The expected offset lies beyond the end of the stream; appending there
    /// would leave a gap.
    #[error("offset gap on stream {stream_id}: expected offset {expected}, stream length is {actual}")]
    OffsetGap {
        /// The stream that was targeted.
        stream_id: String,
        /// The expected offset supplied by the caller.
        expected: i64,
        /// The current stream length.
        actual: i64,
    },

    /// The request itself is malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// Timeout, throttling or connectivity failure. Retried internally with
    /// bounded backoff before it is surfaced.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Unrecoverable storage failure.
    #[error("fatal storage error: {0}")]
    Fatal(String),

    /// The caller's cancellation signal fired before the operation took
    /// effect.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Returns `true` for errors worth retrying with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns `true` for errors the caller resolves by refreshing its
    /// expected offset and retrying the whole append.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::OffsetGap { .. })
    }
}
