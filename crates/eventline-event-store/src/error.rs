//! Classification of sqlx errors into the store error taxonomy.

use eventline_core::error::StoreError;

/// SQLSTATE codes worth retrying: serialization failure, deadlock, lock not
/// available, too many connections, and server shutdown/crash recovery.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03", "53300", "57P01", "57P02", "57P03"];

/// Returns `true` if the error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Maps a sqlx error onto [`StoreError`].
///
/// Unique violations are `Fatal` here; the stream log intercepts them first
/// and reports a concurrency conflict instead.
#[must_use]
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            let code = code.as_deref().unwrap_or_default();
            if TRANSIENT_SQLSTATES.contains(&code) || code.starts_with("08") {
                StoreError::Transient(err.to_string())
            } else if db.is_unique_violation() {
                StoreError::Fatal(format!("unexpected duplicate key: {err}"))
            } else {
                StoreError::Fatal(err.to_string())
            }
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Transient(err.to_string()),
        _ => StoreError::Fatal(err.to_string()),
    }
}
