//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use eventline_core::stream_log::StreamLog;
use eventline_event_store::{HealthProbe, HealthStatus};
use eventline_test_support::{FailingStreamLog, FixedClock, InMemoryEventStore};
use http_body_util::BodyExt;
use tower::ServiceExt;

use eventline_api::build_router;
use eventline_api::state::AppState;

/// A probe that always reports the same status.
pub struct StaticProbe(pub HealthStatus);

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn check(&self) -> HealthStatus {
        self.0.clone()
    }
}

/// An in-memory store on a fixed clock.
pub fn in_memory_store() -> Arc<InMemoryEventStore> {
    let clock = FixedClock(
        chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2026, 1, 15, 10, 0, 0).unwrap(),
    );
    Arc::new(InMemoryEventStore::new(
        std::num::NonZeroU32::new(4).unwrap(),
        Arc::new(clock),
    ))
}

/// Build the app router over `stream_log` with a healthy probe.
pub fn build_test_app(stream_log: Arc<dyn StreamLog>) -> Router {
    build_test_app_with_probe(stream_log, StaticProbe(HealthStatus::Healthy))
}

/// Build the app router over `stream_log` with the given probe.
pub fn build_test_app_with_probe(stream_log: Arc<dyn StreamLog>, probe: StaticProbe) -> Router {
    build_router(AppState::new(stream_log, Arc::new(probe)))
}

/// Build the app router over a store that is unreachable.
pub fn build_failing_app() -> Router {
    build_test_app_with_probe(
        Arc::new(FailingStreamLog),
        StaticProbe(HealthStatus::Unhealthy("connection refused".into())),
    )
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap();

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a DELETE request and return the response.
pub async fn delete_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}
