//! Event store configuration.

use std::num::{NonZeroU32, NonZeroUsize};

use eventline_core::retry::RetryPolicy;

/// Settings shared by the PostgreSQL stores.
///
/// Writers and scanners of one log must agree on `partition_count`; it decides
/// which partition every stream is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStoreConfig {
    /// Number of log partitions.
    pub partition_count: NonZeroU32,
    /// Rows fetched per round trip by `read_stream`.
    pub page_size: NonZeroUsize,
    /// Backoff applied to transient storage errors.
    pub retry: RetryPolicy,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            partition_count: NonZeroU32::new(4).unwrap_or(NonZeroU32::MIN),
            page_size: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            retry: RetryPolicy::default(),
        }
    }
}
