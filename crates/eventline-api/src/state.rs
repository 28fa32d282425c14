//! Shared application state.

use std::sync::Arc;

use eventline_core::stream_log::StreamLog;
use eventline_event_store::HealthProbe;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The stream log serving reads and writes.
    pub stream_log: Arc<dyn StreamLog>,
    /// Probe backing `GET /health`.
    pub health: Arc<dyn HealthProbe>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(stream_log: Arc<dyn StreamLog>, health: Arc<dyn HealthProbe>) -> Self {
        Self { stream_log, health }
    }
}
