//! Error taxonomy shared by the state store, the sensor reader and the router.
//!
//! Transient lock contention is retried where it happens (see [`crate::backoff`]);
//! everything else surfaces here unchanged.

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by the pipeline core.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing database file or table.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write reached the read-only sensor connection.
    #[error("read-only violation: {0}")]
    ReadOnlyViolation(String),

    /// Non-read statement handed to the reader, or a rejected record/phase.
    #[error("validation error: {0}")]
    Validation(String),

    /// Retry budget exhausted while the database stayed busy or locked.
    #[error("{target} unavailable after {attempts} attempts: {source}")]
    StoreUnavailable {
        target: &'static str,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// State store and sensor database wired to the wrong files, or a bad config value.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

impl PipelineError {
    /// True for `SQLITE_BUSY` / `SQLITE_LOCKED`, the only conditions worth retrying.
    pub fn is_contention(&self) -> bool {
        match self {
            Self::Database(err) => is_contention(err),
            _ => false,
        }
    }
}

/// Classify a raw SQLite error as transient lock contention.
pub fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Classify a raw SQLite error as a write refused by a read-only connection.
pub fn is_read_only_refusal(err: &rusqlite::Error) -> bool {
    matches!(err.sqlite_error_code(), Some(ErrorCode::ReadOnly))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32, msg: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), Some(msg.to_string()))
    }

    #[test]
    fn test_busy_and_locked_are_contention() {
        assert!(is_contention(&sqlite_failure(rusqlite::ffi::SQLITE_BUSY, "database is locked")));
        assert!(is_contention(&sqlite_failure(rusqlite::ffi::SQLITE_LOCKED, "table locked")));
    }

    #[test]
    fn test_other_failures_are_not_contention() {
        assert!(!is_contention(&sqlite_failure(rusqlite::ffi::SQLITE_READONLY, "readonly")));
        assert!(!is_contention(&rusqlite::Error::QueryReturnedNoRows));
        assert!(!PipelineError::Validation("x".into()).is_contention());
    }

    #[test]
    fn test_read_only_refusal() {
        assert!(is_read_only_refusal(&sqlite_failure(
            rusqlite::ffi::SQLITE_READONLY,
            "attempt to write a readonly database"
        )));
        assert!(!is_read_only_refusal(&sqlite_failure(rusqlite::ffi::SQLITE_BUSY, "busy")));
    }
}
