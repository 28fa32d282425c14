//! Eventline API server entry point.

use std::sync::Arc;
use std::time::Duration;

use eventline_api::config::ServerConfig;
use eventline_api::error::AppError;
use eventline_api::state::AppState;
use eventline_api::{build_router, telemetry};
use eventline_core::clock::SystemClock;
use eventline_event_store::{PgHealthCheck, PgStreamLog, provision};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let tracer_provider = telemetry::init_tracing()?;

    tracing::info!("Starting Eventline API server");

    let config = ServerConfig::from_env()?;

    // Create database connection pool and make sure the schema exists.
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    provision(&pool).await?;

    let stream_log = Arc::new(PgStreamLog::new(
        pool.clone(),
        config.event_store,
        Arc::new(SystemClock),
    ));
    let health = Arc::new(PgHealthCheck::new(pool, HEALTH_CHECK_TIMEOUT));
    let app_state = AppState::new(stream_log, health);

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = build_router(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.socket_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Eventline API server stopped");
    telemetry::shutdown(tracer_provider);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
