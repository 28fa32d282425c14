//! Consumer callback invoked for every delivered record.

use async_trait::async_trait;
use eventline_core::event::EventRecord;
use thiserror::Error;

/// Failure reported by an [`EventHandler`]. Always unrecoverable for the
/// subscription: it faults and the record is redelivered after a restart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Creates a handler error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives records in commit order per partition.
///
/// Delivery is at-least-once: after a crash the last in-flight batch is
/// delivered again, so handlers should deduplicate on `event_id`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one record.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError` to halt the subscription without advancing the
    /// checkpoint past this record's batch.
    async fn handle(&self, record: &EventRecord) -> Result<(), HandlerError>;
}
