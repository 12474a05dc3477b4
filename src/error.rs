//! Store-level error taxonomy.
//!
//! Everything that can go wrong inside a single store operation maps to one
//! of these variants. Transient contention (`Busy`) is safe to retry;
//! `Conflict` carries enough state for the caller to re-sync and retry;
//! `Migration` is fatal to startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Malformed input. Fatal to the single request, no partial effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced project or asset is absent (or soft-deleted).
    #[error("not found")]
    NotFound,

    /// A revision-checked write lost the race. The caller should re-read at
    /// `current_rev` and decide whether to retry or discard its draft.
    #[error("revision conflict: current revision is {current_rev}")]
    Conflict {
        current_rev: i64,
        updated_at: String,
    },

    /// Transient store contention. Retry with backoff.
    #[error("store is busy")]
    Busy,

    /// A schema migration step failed and was rolled back. The store stays at
    /// its last committed version; the process must not serve traffic.
    #[error("migration to schema version {version} failed")]
    Migration {
        version: i32,
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        if let rusqlite::Error::SqliteFailure(e, _) = &err {
            if matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) {
                return StoreError::Busy;
            }
        }
        StoreError::Sqlite(err)
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;
