//! WAL checkpoint scheduling for the writer.
//!
//! The worker checkpoints when either enough transactions have committed
//! since the last checkpoint or enough time has passed. The check runs after
//! every operation and on every idle tick. Whether the checkpoint itself
//! succeeds or not, the counter and the clock restart.

use std::time::{Duration, Instant};

use mailroom_settings::DatabaseSettings;
use rusqlite::Connection;

use crate::errors::{Result, StoreError};

/// When to checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Committed transactions that force a checkpoint (default: 1000).
    pub threshold: u32,
    /// Maximum time between checkpoints (default: 300 s).
    pub interval: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            threshold: 1000,
            interval: Duration::from_secs(300),
        }
    }
}

impl CheckpointPolicy {
    /// Build from the `database` settings section.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            threshold: settings.checkpoint_threshold,
            interval: settings.checkpoint_interval(),
        }
    }
}

/// Commit counter and last-checkpoint instant, owned by the worker.
#[derive(Debug)]
pub(crate) struct CheckpointTracker {
    policy: CheckpointPolicy,
    pending: u32,
    last: Instant,
}

impl CheckpointTracker {
    pub(crate) fn new(policy: CheckpointPolicy, now: Instant) -> Self {
        Self {
            policy,
            pending: 0,
            last: now,
        }
    }

    pub(crate) fn record_commit(&mut self) {
        self.pending = self.pending.saturating_add(1);
    }

    pub(crate) fn pending(&self) -> u32 {
        self.pending
    }

    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.pending >= self.policy.threshold
            || now.saturating_duration_since(self.last) >= self.policy.interval
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        self.pending = 0;
        self.last = now;
    }
}

/// Outcome of `PRAGMA wal_checkpoint(TRUNCATE)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CheckpointReport {
    pub(crate) wal_frames: i64,
    pub(crate) checkpointed_frames: i64,
}

/// Checkpoint the WAL and truncate it.
///
/// A checkpoint blocked by a reader reports `busy`; that counts as a failure
/// here so it shows up in the writer stats.
pub(crate) fn run_checkpoint(conn: &Connection) -> Result<CheckpointReport> {
    let (busy, wal_frames, checkpointed_frames): (i64, i64, i64) =
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
    if busy != 0 {
        return Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("checkpoint blocked by an active reader".to_string()),
        )));
    }
    Ok(CheckpointReport {
        wal_frames,
        checkpointed_frames,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
