//! Eventline API — HTTP surface over the event store.

use axum::Router;

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod telemetry;

/// Builds the application router. Middleware layers are added by the caller.
pub fn build_router(state: state::AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/streams", routes::streams::router())
        .with_state(state)
}
