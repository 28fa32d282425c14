//! Storage health probe.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The backing store answered.
    Healthy,
    /// The backing store is unreachable or failing, with a reason.
    Unhealthy(String),
}

impl HealthStatus {
    /// Returns `true` for [`HealthStatus::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Checks whether the backing store is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probes the store. Never fails; problems are reported as
    /// [`HealthStatus::Unhealthy`].
    async fn check(&self) -> HealthStatus;
}

/// Probes `PostgreSQL` with `SELECT 1` under a timeout.
#[derive(Debug, Clone)]
pub struct PgHealthCheck {
    pool: PgPool,
    timeout: Duration,
}

impl PgHealthCheck {
    /// Creates a probe that gives up after `timeout`.
    #[must_use]
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl HealthProbe for PgHealthCheck {
    async fn check(&self) -> HealthStatus {
        let probe = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool);
        let status = match tokio::time::timeout(self.timeout, probe).await {
            Ok(Ok(_)) => HealthStatus::Healthy,
            Ok(Err(err)) => HealthStatus::Unhealthy(err.to_string()),
            Err(_) => HealthStatus::Unhealthy(format!(
                "no response within {} ms",
                self.timeout.as_millis()
            )),
        };
        if let HealthStatus::Unhealthy(reason) = &status {
            warn!(%reason, "event store health check failed");
        }
        status
    }
}
