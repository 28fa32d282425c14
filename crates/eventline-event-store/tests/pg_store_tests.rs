//! Integration tests for the PostgreSQL stores.
//!
//! `#[sqlx::test]` creates a scratch database per test on the server named
//! by `DATABASE_URL`.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use eventline_core::checkpoint::{CheckpointStore, LeaseDecision};
use eventline_core::clock::SystemClock;
use eventline_core::error::StoreError;
use eventline_core::event::{EventData, EventRecord};
use eventline_core::position::{LogPosition, PartitionId, partition_for};
use eventline_core::scanner::LogScanner;
use eventline_core::stream_log::StreamLog;
use eventline_event_store::{
    EventStoreConfig, HealthProbe, HealthStatus, PgCheckpointStore, PgHealthCheck, PgLogScanner,
    PgStreamLog, provision,
};
use eventline_test_support::FixedClock;
use futures::TryStreamExt;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn config() -> EventStoreConfig {
    EventStoreConfig {
        partition_count: NonZeroU32::new(2).unwrap(),
        ..EventStoreConfig::default()
    }
}

async fn stream_log(pool: &PgPool) -> PgStreamLog {
    provision(pool).await.unwrap();
    PgStreamLog::new(pool.clone(), config(), Arc::new(SystemClock))
}

fn event(event_type: &str) -> EventData {
    EventData::new(event_type, event_type.as_bytes().to_vec())
}

async fn read_all(log: &PgStreamLog, stream_id: &str) -> Vec<EventRecord> {
    log.read_stream(stream_id, 0, usize::MAX)
        .try_collect()
        .await
        .unwrap()
}

/// Scans one partition from the start until `expected` records are visible.
/// Other databases on the same server can hold the snapshot horizon back for
/// a moment, so visibility is polled rather than asserted immediately.
async fn scan_until(
    scanner: &PgLogScanner,
    partition: PartitionId,
    expected: usize,
) -> Vec<EventRecord> {
    let mut seen = Vec::new();
    let mut position = LogPosition::Start;
    for _ in 0..100 {
        let batch = scanner.scan(partition, &position, 10).await.unwrap();
        seen.extend(batch.records);
        position = batch.next;
        if seen.len() >= expected {
            return seen;
        }
        if batch.at_end {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    panic!("expected {expected} records, saw {}", seen.len());
}

// --- append / read ---

#[sqlx::test(migrations = false)]
async fn test_committed_batch_is_recognised_by_its_event_ids(pool: PgPool) {
    // Arrange
    let log = stream_log(&pool).await;
    let cancel = CancellationToken::new();
    let batch = [event("Placed"), event("Paid")];
    log.append("order-1", 0, &batch, &cancel).await.unwrap();
    let other_writer = [event("Placed"), event("Paid")];

    // Act
    let ours = log.batch_already_committed("order-1", 0, &batch).await.unwrap();
    let theirs = log
        .batch_already_committed("order-1", 0, &other_writer)
        .await
        .unwrap();
    let shifted = log.batch_already_committed("order-1", 1, &batch).await.unwrap();

    // Assert
    assert!(ours);
    assert!(!theirs);
    assert!(!shifted);
}

#[sqlx::test(migrations = false)]
async fn test_append_assigns_contiguous_offsets(pool: PgPool) {
    // Arrange
    let log = stream_log(&pool).await;
    let cancel = CancellationToken::new();

    // Act
    let first = log
        .append("order-1", 0, &[event("Placed"), event("Paid")], &cancel)
        .await
        .unwrap();
    let second = log
        .append("order-1", 2, &[event("Shipped")], &cancel)
        .await
        .unwrap();

    // Assert
    assert_eq!(first.first_offset, 0);
    assert_eq!(first.next_offset, 2);
    assert_eq!(second.next_offset, 3);
    let records = read_all(&log, "order-1").await;
    let offsets: Vec<i64> = records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2]);
    assert_eq!(records[2].event_type, "Shipped");
    assert_eq!(records[0].payload, b"Placed".to_vec());
    assert_eq!(log.stream_length("order-1").await.unwrap(), 3);
}

#[sqlx::test(migrations = false)]
async fn test_stale_expected_offset_is_a_conflict(pool: PgPool) {
    let log = stream_log(&pool).await;
    let cancel = CancellationToken::new();
    log.append("order-2", 0, &[event("A"), event("B")], &cancel)
        .await
        .unwrap();

    let result = log.append("order-2", 1, &[event("C")], &cancel).await;

    match result {
        Err(StoreError::ConcurrencyConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("expected ConcurrencyConflict, got {other:?}"),
    }
    assert_eq!(read_all(&log, "order-2").await.len(), 2);
}

#[sqlx::test(migrations = false)]
async fn test_expected_offset_past_the_end_is_a_gap(pool: PgPool) {
    let log = stream_log(&pool).await;

    let result = log
        .append("order-3", 4, &[event("A")], &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(StoreError::OffsetGap { actual: 0, .. })));
}

#[sqlx::test(migrations = false)]
async fn test_concurrent_appenders_at_same_offset_have_one_winner(pool: PgPool) {
    // Arrange
    let log = Arc::new(stream_log(&pool).await);
    let writers = 8;

    // Act
    let mut handles = Vec::new();
    for n in 0..writers {
        let log = Arc::clone(&log);
        handles.push(tokio::spawn(async move {
            log.append(
                "contended",
                0,
                &[event(&format!("writer-{n}"))],
                &CancellationToken::new(),
            )
            .await
        }));
    }
    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert!(err.is_conflict(), "unexpected error {err:?}"),
        }
    }

    // Assert
    assert_eq!(winners, 1);
    assert_eq!(log.stream_length("contended").await.unwrap(), 1);
}

#[sqlx::test(migrations = false)]
async fn test_cancelled_append_writes_nothing(pool: PgPool) {
    let log = stream_log(&pool).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = log.append("order-4", 0, &[event("A")], &cancel).await;

    assert_eq!(result.unwrap_err(), StoreError::Cancelled);
    assert_eq!(log.stream_length("order-4").await.unwrap(), 0);
}

#[sqlx::test(migrations = false)]
async fn test_read_stream_pages_through_long_streams(pool: PgPool) {
    // Arrange
    provision(&pool).await.unwrap();
    let config = EventStoreConfig {
        page_size: std::num::NonZeroUsize::new(3).unwrap(),
        ..config()
    };
    let log = PgStreamLog::new(pool.clone(), config, Arc::new(SystemClock));
    let events: Vec<EventData> = (0..10).map(|n| event(&format!("E{n}"))).collect();
    log.append("long", 0, &events, &CancellationToken::new())
        .await
        .unwrap();

    // Act
    let tail: Vec<EventRecord> = log.read_stream("long", 4, 5).try_collect().await.unwrap();
    let everything = read_all(&log, "long").await;

    // Assert
    let offsets: Vec<i64> = tail.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![4, 5, 6, 7, 8]);
    assert_eq!(everything.len(), 10);
}

#[sqlx::test(migrations = false)]
async fn test_metadata_and_partition_are_persisted(pool: PgPool) {
    let log = stream_log(&pool).await;
    let data = event("Tagged").with_metadata("correlation_id", "c-9");

    log.append("tagged", 0, &[data], &CancellationToken::new())
        .await
        .unwrap();

    let records = read_all(&log, "tagged").await;
    assert_eq!(
        records[0].metadata.get("correlation_id").map(String::as_str),
        Some("c-9")
    );
    assert_eq!(
        records[0].partition_id,
        partition_for("tagged", config().partition_count)
    );
}

#[sqlx::test(migrations = false)]
async fn test_delete_stream_is_idempotent(pool: PgPool) {
    let log = stream_log(&pool).await;
    let cancel = CancellationToken::new();
    log.append("doomed", 0, &[event("A"), event("B")], &cancel)
        .await
        .unwrap();

    let first = log.delete_stream("doomed", &cancel).await.unwrap();
    let second = log.delete_stream("doomed", &cancel).await.unwrap();

    assert_eq!(first, 2);
    assert_eq!(second, 0);
    assert!(read_all(&log, "doomed").await.is_empty());
    // A deleted stream starts over at offset zero.
    log.append("doomed", 0, &[event("C")], &cancel).await.unwrap();
}

// --- scanner ---

#[sqlx::test(migrations = false)]
async fn test_scan_returns_partition_records_in_commit_order(pool: PgPool) {
    // Arrange
    let log = stream_log(&pool).await;
    let scanner = PgLogScanner::new(pool.clone(), config());
    let cancel = CancellationToken::new();
    let stream_ids = ["s-a", "s-b", "s-c", "s-d"];
    for stream_id in stream_ids {
        log.append(stream_id, 0, &[event("One"), event("Two")], &cancel)
            .await
            .unwrap();
    }

    // Act / Assert
    let mut total = 0;
    for partition in scanner.partitions() {
        let expected = stream_ids
            .iter()
            .filter(|id| partition_for(id, config().partition_count) == partition)
            .count()
            * 2;
        let records = scan_until(&scanner, partition, expected).await;
        assert_eq!(records.len(), expected);
        assert!(records.iter().all(|r| r.partition_id == partition));
        assert!(
            records
                .windows(2)
                .all(|pair| pair[0].commit_position < pair[1].commit_position)
        );
        total += records.len();
    }
    assert_eq!(total, 8);
}

#[sqlx::test(migrations = false)]
async fn test_scan_resumes_after_returned_position(pool: PgPool) {
    let log = stream_log(&pool).await;
    let scanner = PgLogScanner::new(pool.clone(), config());
    let partition = partition_for("resume", config().partition_count);
    let events: Vec<EventData> = (0..5).map(|n| event(&format!("E{n}"))).collect();
    log.append("resume", 0, &events, &CancellationToken::new())
        .await
        .unwrap();
    scan_until(&scanner, partition, 5).await;

    let first = scanner.scan(partition, &LogPosition::Start, 3).await.unwrap();
    let rest = scanner.scan(partition, &first.next, 10).await.unwrap();

    assert_eq!(first.records.len(), 3);
    assert!(!first.at_end);
    let offsets: Vec<i64> = rest.records.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![3, 4]);
    assert!(rest.at_end);
}

// --- checkpoints and leases ---

#[sqlx::test(migrations = false)]
async fn test_checkpoint_round_trip(pool: PgPool) {
    provision(&pool).await.unwrap();
    let store = PgCheckpointStore::new(pool, config().retry, Arc::new(SystemClock));
    let partition = PartitionId(1);

    let before = store.load_checkpoint("projector", partition).await.unwrap();
    let token = eventline_core::position::CommitPosition::new(42, 7).to_token();
    store
        .save_checkpoint("projector", partition, &token)
        .await
        .unwrap();
    let after = store.load_checkpoint("projector", partition).await.unwrap();

    assert_eq!(before, LogPosition::Start);
    assert_eq!(after, LogPosition::After(token));
}

#[sqlx::test(migrations = false)]
async fn test_lease_is_exclusive_until_it_expires(pool: PgPool) {
    // Arrange
    provision(&pool).await.unwrap();
    let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
    let store = PgCheckpointStore::new(pool, config().retry, Arc::new(FixedClock(t0)));
    let partition = PartitionId(0);
    let ttl = Duration::from_secs(30);

    // Act
    let first = store
        .acquire_lease("projector", partition, "node-a", ttl, t0)
        .await
        .unwrap();
    let contender = store
        .acquire_lease("projector", partition, "node-b", ttl, t0)
        .await
        .unwrap();
    let renewal = store
        .acquire_lease("projector", partition, "node-a", ttl, t0)
        .await
        .unwrap();
    let after_expiry = store
        .acquire_lease(
            "projector",
            partition,
            "node-b",
            ttl,
            t0 + chrono::Duration::seconds(31),
        )
        .await
        .unwrap();

    // Assert
    assert!(first.is_granted());
    match contender {
        LeaseDecision::Denied { holder, .. } => assert_eq!(holder, "node-a"),
        other => panic!("expected Denied, got {other:?}"),
    }
    assert!(renewal.is_granted());
    assert!(after_expiry.is_granted());
}

#[sqlx::test(migrations = false)]
async fn test_release_frees_lease_and_keeps_position(pool: PgPool) {
    provision(&pool).await.unwrap();
    let store = PgCheckpointStore::new(pool, config().retry, Arc::new(SystemClock));
    let partition = PartitionId(0);
    let now = Utc::now();
    let ttl = Duration::from_secs(60);
    let token = eventline_core::position::CommitPosition::new(9, 1).to_token();
    store
        .acquire_lease("indexer", partition, "node-a", ttl, now)
        .await
        .unwrap();
    store.save_checkpoint("indexer", partition, &token).await.unwrap();

    store.release_lease("indexer", partition, "node-b").await.unwrap();
    let still_held = store
        .acquire_lease("indexer", partition, "node-b", ttl, now)
        .await
        .unwrap();
    store.release_lease("indexer", partition, "node-a").await.unwrap();
    let freed = store
        .acquire_lease("indexer", partition, "node-b", ttl, now)
        .await
        .unwrap();

    assert!(!still_held.is_granted());
    assert!(freed.is_granted());
    let checkpoints = store.list_checkpoints("indexer").await.unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0].position, LogPosition::After(token));
    assert_eq!(checkpoints[0].lease_owner.as_deref(), Some("node-b"));
}

#[sqlx::test(migrations = false)]
async fn test_delete_subscriber_removes_every_partition(pool: PgPool) {
    provision(&pool).await.unwrap();
    let store = PgCheckpointStore::new(pool, config().retry, Arc::new(SystemClock));
    let token = eventline_core::position::CommitPosition::new(1, 1).to_token();
    for partition in [PartitionId(0), PartitionId(1)] {
        store.save_checkpoint("gone", partition, &token).await.unwrap();
    }
    store.save_checkpoint("kept", PartitionId(0), &token).await.unwrap();

    let deleted = store.delete_subscriber("gone").await.unwrap();

    assert_eq!(deleted, 2);
    assert!(store.list_checkpoints("gone").await.unwrap().is_empty());
    assert_eq!(store.list_checkpoints("kept").await.unwrap().len(), 1);
}

// --- provisioning and health ---

#[sqlx::test(migrations = false)]
async fn test_provision_is_idempotent(pool: PgPool) {
    provision(&pool).await.unwrap();
    provision(&pool).await.unwrap();

    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_name IN ('event_records', 'subscription_checkpoints')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(tables, 2);
}

#[sqlx::test(migrations = false)]
async fn test_health_check_reports_healthy(pool: PgPool) {
    let probe = PgHealthCheck::new(pool, Duration::from_secs(5));

    assert_eq!(probe.check().await, HealthStatus::Healthy);
}
