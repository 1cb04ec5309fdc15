//! Error types for the store.
//!
//! [`StoreError`] separates the three failure classes callers care about:
//! transient contention ([`StoreError::is_transient`]), which the retrying
//! façade absorbs; constraint violations
//! ([`StoreError::is_constraint_violation`]), which are application errors
//! and never retried; and everything else.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error raised while executing an operation.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database file could not be opened or configured.
    #[error("failed to open database {}: {source}", path.display())]
    Connection {
        /// Path that was being opened.
        path: PathBuf,
        /// Underlying `SQLite` error.
        #[source]
        source: rusqlite::Error,
    },

    /// The write queue is at capacity.
    #[error("write queue is full ({capacity} operations pending)")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The write queue is not running (never started, or stopped).
    #[error("write queue is not running")]
    QueueClosed,

    /// The worker went away before answering a submitted operation.
    #[error("write worker exited before delivering a result")]
    WorkerLost,

    /// The caller stopped waiting; the operation stays queued and will run.
    #[error("no write result within {0:?}")]
    Timeout(Duration),

    /// A stored value did not have the expected shape.
    #[error("corrupt value in {table}.{column}: {detail}")]
    CorruptRow {
        /// Table the value came from.
        table: &'static str,
        /// Column the value came from.
        column: &'static str,
        /// What was wrong with it.
        detail: String,
    },

    /// A request the store refuses to run.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A blocking read task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    BlockingTask(String),

    /// Filesystem or thread-spawn failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Contention that may clear on its own: database busy or locked, or a
    /// full write queue.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            ),
            Self::QueueFull { .. } => true,
            _ => false,
        }
    }

    /// A `UNIQUE`, `CHECK`, `NOT NULL` or foreign-key violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
        )
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
