//! Subscription error types.

use eventline_core::error::StoreError;
use thiserror::Error;
use uuid::Uuid;

use crate::handler::HandlerError;

/// Reason a subscription faulted or could not be joined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// A storage call failed for good.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The handler rejected a record.
    #[error("handler failed on {stream_id}@{offset} ({event_id}): {source}")]
    Handler {
        /// Stream of the rejected record.
        stream_id: String,
        /// Offset of the rejected record.
        offset: i64,
        /// Id of the rejected record.
        event_id: Uuid,
        /// The handler's error.
        source: HandlerError,
    },

    /// The subscription task panicked or was aborted.
    #[error("subscription task failed: {0}")]
    Task(String),
}
