//! Subscription configuration.

use std::time::Duration;

use eventline_core::retry::RetryPolicy;
use uuid::Uuid;

/// Settings of one catch-up subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Logical consumer; checkpoints are stored under this id.
    pub subscriber_id: String,
    /// Identity used when claiming partition leases. Two engines sharing a
    /// subscriber id must use different owner ids.
    pub owner_id: String,
    /// Maximum records pulled per scan.
    pub batch_size: usize,
    /// Delay between polls once caught up.
    pub poll_interval: Duration,
    /// Lifetime of a partition lease; leases are renewed at half-life.
    pub lease_ttl: Duration,
    /// Backoff for transient scan failures.
    pub retry: RetryPolicy,
}

impl SubscriptionConfig {
    /// Creates a configuration with default tuning and a random owner id.
    #[must_use]
    pub fn new(subscriber_id: impl Into<String>) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            owner_id: Uuid::new_v4().to_string(),
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            lease_ttl: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the lease owner id.
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Sets the scan batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the live polling interval.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sets the lease lifetime.
    #[must_use]
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self
    }

    /// Sets the scan retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
