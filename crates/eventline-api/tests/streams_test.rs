//! Integration tests for the stream endpoints.

mod common;

use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use uuid::Uuid;

fn event(event_type: &str, payload: &[u8]) -> serde_json::Value {
    json!({ "event_type": event_type, "payload": STANDARD.encode(payload) })
}

#[tokio::test]
async fn test_append_then_read_round_trip() {
    // Arrange
    let store = common::in_memory_store();
    let event_id = Uuid::new_v4();
    let body = json!({
        "expected_offset": 0,
        "events": [
            { "event_id": event_id, "event_type": "Opened", "payload": STANDARD.encode(b"a0"),
              "metadata": { "correlation_id": "c-1" } },
            event("Deposited", b"a1"),
        ]
    });

    // Act
    let (status, appended) =
        common::post_json(common::build_test_app(store.clone()), "/api/v1/streams/acct-1/events", &body).await;
    let (read_status, read) =
        common::get_json(common::build_test_app(store), "/api/v1/streams/acct-1/events").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(appended["first_offset"], 0);
    assert_eq!(appended["next_offset"], 2);
    assert_eq!(appended["event_ids"][0], event_id.to_string());

    assert_eq!(read_status, StatusCode::OK);
    assert_eq!(read["stream_id"], "acct-1");
    let events = read["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["offset"], 0);
    assert_eq!(events[0]["event_type"], "Opened");
    assert_eq!(events[0]["payload"], STANDARD.encode(b"a0"));
    assert_eq!(events[0]["metadata"]["correlation_id"], "c-1");
    assert_eq!(events[1]["offset"], 1);
    assert_eq!(events[1]["event_type"], "Deposited");
}

#[tokio::test]
async fn test_stale_offset_returns_409_conflict() {
    let store = common::in_memory_store();
    let uri = "/api/v1/streams/s1/events";
    let first = json!({ "expected_offset": 0, "events": [event("A0", b"0"), event("A1", b"1")] });
    let stale = json!({ "expected_offset": 0, "events": [event("B0", b"2")] });
    common::post_json(common::build_test_app(store.clone()), uri, &first).await;

    let (status, json) = common::post_json(common::build_test_app(store.clone()), uri, &stale).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "concurrency_conflict");

    let retry = json!({ "expected_offset": 2, "events": [event("B0", b"2")] });
    let (status, json) = common::post_json(common::build_test_app(store), uri, &retry).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["next_offset"], 3);
}

#[tokio::test]
async fn test_offset_past_end_returns_409_offset_gap() {
    let body = json!({ "expected_offset": 5, "events": [event("A", b"x")] });

    let (status, json) = common::post_json(
        common::build_test_app(common::in_memory_store()),
        "/api/v1/streams/s1/events",
        &body,
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "offset_gap");
}

#[tokio::test]
async fn test_invalid_base64_payload_returns_400() {
    let body = json!({
        "expected_offset": 0,
        "events": [{ "event_type": "A", "payload": "%%%" }]
    });

    let (status, json) = common::post_json(
        common::build_test_app(common::in_memory_store()),
        "/api/v1/streams/s1/events",
        &body,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_read_honours_from_and_max() {
    let store = common::in_memory_store();
    let events: Vec<_> = (0..6).map(|n| event(&format!("E{n}"), b"x")).collect();
    common::post_json(
        common::build_test_app(store.clone()),
        "/api/v1/streams/s1/events",
        &json!({ "expected_offset": 0, "events": events }),
    )
    .await;

    let (status, json) = common::get_json(
        common::build_test_app(store),
        "/api/v1/streams/s1/events?from=2&max=3",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let offsets: Vec<i64> = json["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["offset"].as_i64().unwrap())
        .collect();
    assert_eq!(offsets, vec![2, 3, 4]);
}

#[tokio::test]
async fn test_read_of_unknown_stream_is_empty() {
    let (status, json) = common::get_json(
        common::build_test_app(common::in_memory_store()),
        "/api/v1/streams/nobody/events",
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["events"], json!([]));
}

#[tokio::test]
async fn test_delete_stream_is_idempotent() {
    let store = common::in_memory_store();
    common::post_json(
        common::build_test_app(store.clone()),
        "/api/v1/streams/s1/events",
        &json!({ "expected_offset": 0, "events": [event("A", b"x"), event("B", b"y")] }),
    )
    .await;

    let (status, first) =
        common::delete_json(common::build_test_app(store.clone()), "/api/v1/streams/s1").await;
    let (_, second) =
        common::delete_json(common::build_test_app(store.clone()), "/api/v1/streams/s1").await;
    let (_, read) = common::get_json(common::build_test_app(store), "/api/v1/streams/s1/events").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["deleted"], 2);
    assert_eq!(second["deleted"], 0);
    assert_eq!(read["events"], json!([]));
}

#[tokio::test]
async fn test_unreachable_store_returns_503() {
    let (status, json) = common::post_json(
        common::build_failing_app(),
        "/api/v1/streams/s1/events",
        &json!({ "expected_offset": 0, "events": [event("A", b"x")] }),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "store_unavailable");
}
