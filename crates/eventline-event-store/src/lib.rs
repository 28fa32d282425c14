//! Eventline Event Store — PostgreSQL backend.
//!
//! Implements the stream log, checkpoint store and log scanner traits of
//! `eventline-core` on two tables: `event_records`, keyed by
//! `(stream_id, stream_offset)`, and `subscription_checkpoints`, keyed by
//! `(subscriber_id, partition_id)`.

pub mod codec;
pub mod config;
pub mod error;
pub mod health;
pub mod pg_checkpoint_store;
pub mod pg_log_scanner;
pub mod pg_stream_log;
pub mod schema;

pub use config::EventStoreConfig;
pub use health::{HealthProbe, HealthStatus, PgHealthCheck};
pub use pg_checkpoint_store::PgCheckpointStore;
pub use pg_log_scanner::PgLogScanner;
pub use pg_stream_log::PgStreamLog;
pub use schema::provision;
