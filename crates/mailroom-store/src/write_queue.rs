//! The single-writer queue.
//!
//! A dedicated OS thread owns the only write connection for the queue's
//! lifetime. Callers enqueue [`WriteOperation`]s on a bounded channel; the
//! worker pulls them one at a time in arrival order, runs each in its own
//! transaction and sends the outcome back on a oneshot when the caller asked
//! for it. A failing operation only fails itself.
//!
//! While idle the worker wakes every `idle_tick` to check whether a
//! checkpoint is due. [`WriteQueue::stop`] enqueues a shutdown marker behind
//! all pending work, so everything submitted before `stop` still runs.
//!
//! Abandoning a wait (dropping the `submit` future or timing out) does not
//! cancel the operation; its result is simply discarded.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mailroom_settings::DatabaseSettings;
use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointPolicy, CheckpointTracker, run_checkpoint};
use crate::connection::{ConnectionConfig, open_connection};
use crate::errors::{Result, StoreError};
use crate::operation::{Params, QueryResult, WriteOperation};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Write queue configuration.
#[derive(Clone, Debug)]
pub struct WriteQueueConfig {
    /// Database the writer connects to.
    pub connection: ConnectionConfig,
    /// Operations that may wait in the queue (default: 1024).
    pub capacity: usize,
    /// How long the idle worker sleeps between checkpoint checks (default: 1 s).
    pub idle_tick: Duration,
    /// When to checkpoint.
    pub checkpoint: CheckpointPolicy,
}

impl WriteQueueConfig {
    /// Defaults for the given connection.
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            capacity: 1024,
            idle_tick: Duration::from_secs(1),
            checkpoint: CheckpointPolicy::default(),
        }
    }

    /// Build from the `database` settings section.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            connection: ConnectionConfig::from_settings(settings),
            capacity: settings.writer_queue_capacity,
            idle_tick: settings.writer_idle_tick(),
            checkpoint: CheckpointPolicy::from_settings(settings),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stats
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    executed: AtomicU64,
    failed: AtomicU64,
    checkpoints: AtomicU64,
    checkpoint_failures: AtomicU64,
    pending_since_checkpoint: AtomicU32,
    queued: AtomicUsize,
    running: AtomicBool,
}

/// Point-in-time view of the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Operations committed.
    pub executed: u64,
    /// Operations rolled back.
    pub failed: u64,
    /// Checkpoints that completed.
    pub checkpoints: u64,
    /// Checkpoints that failed (counter was reset anyway).
    pub checkpoint_failures: u64,
    /// Commits since the last checkpoint attempt.
    pub pending_since_checkpoint: u32,
    /// Operations waiting in the queue.
    pub queued: usize,
    /// Whether the worker thread is alive.
    pub running: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

type Reply = oneshot::Sender<Result<QueryResult>>;

enum Command {
    Execute {
        op: WriteOperation,
        reply: Option<Reply>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

struct WorkerHandle {
    tx: SyncSender<Command>,
    thread: JoinHandle<()>,
}

/// The only component allowed to mutate the database.
pub struct WriteQueue {
    config: WriteQueueConfig,
    worker: Mutex<Option<WorkerHandle>>,
    counters: Arc<Counters>,
}

impl WriteQueue {
    /// Create a stopped queue.
    pub fn new(config: WriteQueueConfig) -> Self {
        Self {
            config,
            worker: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Open the write connection and spawn the worker.
    ///
    /// Failing to open the connection is fatal and returned here. Calling
    /// `start` on a running queue logs a warning and does nothing.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("write queue worker is already running");
            return Ok(());
        }

        let conn = open_connection(&self.config.connection)?;
        let (tx, rx) = mpsc::sync_channel(self.config.capacity);
        let counters = Arc::clone(&self.counters);
        let policy = self.config.checkpoint.clone();
        let idle_tick = self.config.idle_tick;

        counters.running.store(true, Ordering::SeqCst);
        let spawned = std::thread::Builder::new()
            .name("mailroom-writer".to_string())
            .spawn(move || worker_loop(conn, &rx, &counters, policy, idle_tick));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                self.counters.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };

        *worker = Some(WorkerHandle { tx, thread });
        info!(
            path = %self.config.connection.path.display(),
            capacity = self.config.capacity,
            "write queue started"
        );
        Ok(())
    }

    /// Whether a worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Enqueue an operation.
    ///
    /// With `want_result` the caller waits for the operation to run and
    /// receives its rows or its error. Without it, this returns `Ok(None)` as
    /// soon as the operation is queued and any failure is only logged (and
    /// passed to the operation's error hook).
    pub async fn submit(
        &self,
        op: WriteOperation,
        want_result: bool,
    ) -> Result<Option<QueryResult>> {
        if !want_result {
            self.enqueue(op, None)?;
            return Ok(None);
        }

        let (reply, outcome) = oneshot::channel();
        self.enqueue(op, Some(reply))?;
        match outcome.await {
            Ok(result) => result.map(Some),
            Err(_) => Err(StoreError::WorkerLost),
        }
    }

    /// Enqueue one independent fire-and-forget statement per parameter set.
    ///
    /// There is no atomicity across the batch. Returns how many were queued;
    /// on an enqueue failure the earlier sets stay queued.
    pub fn submit_batch(&self, sql: &str, param_sets: Vec<Params>) -> Result<usize> {
        let mut queued = 0;
        for params in param_sets {
            self.enqueue(WriteOperation::statement(sql, params), None)?;
            queued += 1;
        }
        Ok(queued)
    }

    /// Drain every queued operation, then stop the worker.
    ///
    /// Stopping a queue that is not running is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let handle = self.worker.lock().take();
        let Some(WorkerHandle { tx, thread }) = handle else {
            debug!("write queue not running, nothing to stop");
            return Ok(());
        };

        let (ack, acked) = oneshot::channel();
        // blocking send: waits for room behind the pending operations
        let sent = tokio::task::spawn_blocking(move || tx.send(Command::Shutdown { ack }).is_ok())
            .await
            .map_err(|e| StoreError::BlockingTask(e.to_string()))?;
        if sent {
            let _ = acked.await;
        }

        let joined = tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|e| StoreError::BlockingTask(e.to_string()))?;
        if joined.is_err() {
            error!("write queue worker panicked");
            return Err(StoreError::WorkerLost);
        }

        let stats = self.stats();
        info!(
            executed = stats.executed,
            failed = stats.failed,
            checkpoints = stats.checkpoints,
            "write queue stopped"
        );
        Ok(())
    }

    /// Snapshot of the writer counters.
    pub fn stats(&self) -> WriterStats {
        let c = &self.counters;
        WriterStats {
            executed: c.executed.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            checkpoints: c.checkpoints.load(Ordering::SeqCst),
            checkpoint_failures: c.checkpoint_failures.load(Ordering::SeqCst),
            pending_since_checkpoint: c.pending_since_checkpoint.load(Ordering::SeqCst),
            queued: c.queued.load(Ordering::SeqCst),
            running: c.running.load(Ordering::SeqCst),
        }
    }

    fn enqueue(&self, op: WriteOperation, reply: Option<Reply>) -> Result<()> {
        let worker = self.worker.lock();
        let Some(handle) = worker.as_ref() else {
            return Err(StoreError::QueueClosed);
        };

        let _ = self.counters.queued.fetch_add(1, Ordering::SeqCst);
        match handle.tx.try_send(Command::Execute { op, reply }) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.counters.queued.fetch_sub(1, Ordering::SeqCst);
                match e {
                    TrySendError::Full(_) => Err(StoreError::QueueFull {
                        capacity: self.config.capacity,
                    }),
                    TrySendError::Disconnected(_) => Err(StoreError::QueueClosed),
                }
            }
        }
    }
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Worker
// ─────────────────────────────────────────────────────────────────────────────

fn worker_loop(
    mut conn: Connection,
    rx: &Receiver<Command>,
    counters: &Counters,
    policy: CheckpointPolicy,
    idle_tick: Duration,
) {
    let mut tracker = CheckpointTracker::new(policy, Instant::now());
    debug!("write queue worker running");

    loop {
        match rx.recv_timeout(idle_tick) {
            Ok(Command::Execute { op, reply }) => {
                let _ = counters.queued.fetch_sub(1, Ordering::SeqCst);
                execute(&mut conn, op, reply, &mut tracker, counters);
                maybe_checkpoint(&conn, &mut tracker, counters);
            }
            Ok(Command::Shutdown { ack }) => {
                final_checkpoint(&conn, &mut tracker, counters);
                counters.running.store(false, Ordering::SeqCst);
                let _ = ack.send(());
                break;
            }
            Err(RecvTimeoutError::Timeout) => maybe_checkpoint(&conn, &mut tracker, counters),
            Err(RecvTimeoutError::Disconnected) => {
                // queue dropped without stop()
                final_checkpoint(&conn, &mut tracker, counters);
                counters.running.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    if let Err((_, e)) = conn.close() {
        warn!(error = %e, "failed to close write connection");
    }
    debug!("write queue worker exited");
}

fn execute(
    conn: &mut Connection,
    op: WriteOperation,
    reply: Option<Reply>,
    tracker: &mut CheckpointTracker,
    counters: &Counters,
) {
    let label = op.describe();
    let outcome = op.run(conn);

    match &outcome {
        Ok(_) => {
            tracker.record_commit();
            counters
                .pending_since_checkpoint
                .store(tracker.pending(), Ordering::SeqCst);
            let _ = counters.executed.fetch_add(1, Ordering::SeqCst);
        }
        Err(e) => {
            let _ = counters.failed.fetch_add(1, Ordering::SeqCst);
            warn!(operation = %label, error = %e, "write operation failed, rolled back");
        }
    }

    if let Some(reply) = reply {
        // caller may have stopped waiting
        let _ = reply.send(outcome);
    }
}

fn maybe_checkpoint(conn: &Connection, tracker: &mut CheckpointTracker, counters: &Counters) {
    let now = Instant::now();
    if tracker.is_due(now) {
        checkpoint(conn, tracker, counters, now);
    }
}

fn final_checkpoint(conn: &Connection, tracker: &mut CheckpointTracker, counters: &Counters) {
    if tracker.pending() > 0 {
        checkpoint(conn, tracker, counters, Instant::now());
    }
}

fn checkpoint(
    conn: &Connection,
    tracker: &mut CheckpointTracker,
    counters: &Counters,
    now: Instant,
) {
    let transactions = tracker.pending();
    match run_checkpoint(conn) {
        Ok(report) => {
            let _ = counters.checkpoints.fetch_add(1, Ordering::SeqCst);
            debug!(
                transactions,
                wal_frames = report.wal_frames,
                checkpointed = report.checkpointed_frames,
                "checkpoint complete"
            );
        }
        Err(e) => {
            let _ = counters.checkpoint_failures.fetch_add(1, Ordering::SeqCst);
            error!(transactions, error = %e, "checkpoint failed");
        }
    }
    tracker.reset(now);
    counters.pending_since_checkpoint.store(0, Ordering::SeqCst);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;

    use assert_matches::assert_matches;
    use mailroom_core::logging::capture_logs;
    use rusqlite::types::Value;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> WriteQueueConfig {
        let mut config = WriteQueueConfig::new(ConnectionConfig::new(dir.path().join("w.db")));
        config.idle_tick = Duration::from_millis(20);
        config
    }

    async fn started(config: WriteQueueConfig) -> WriteQueue {
        let queue = WriteQueue::new(config);
        queue.start().unwrap();
        let _ = queue
            .submit(
                WriteOperation::statement(
                    "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE)",
                    vec![],
                ),
                true,
            )
            .await
            .unwrap();
        queue
    }

    fn insert(name: &str) -> WriteOperation {
        WriteOperation::statement(
            "INSERT INTO items (name) VALUES (?) RETURNING id",
            vec![Value::Text(name.to_string())],
        )
    }

    #[tokio::test]
    async fn submit_before_start_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = WriteQueue::new(config(&dir));
        assert_matches!(
            queue.submit(insert("a"), true).await,
            Err(StoreError::QueueClosed)
        );
    }

    #[tokio::test]
    async fn second_start_warns_and_keeps_worker() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;

        let (logs, _guard) = capture_logs();
        queue.start().unwrap();
        assert!(logs.has_event(tracing::Level::WARN, "already running"));
        assert!(queue.is_running());

        let _ = queue.submit(insert("a"), true).await.unwrap();
        queue.stop().await.unwrap();
    }

    #[test]
    fn start_fails_when_database_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let queue = WriteQueue::new(WriteQueueConfig::new(ConnectionConfig::new(
            dir.path().join("missing").join("w.db"),
        )));
        assert_matches!(queue.start(), Err(StoreError::Connection { .. }));
        assert!(!queue.is_running());
        assert!(!queue.stats().running);
    }

    #[tokio::test]
    async fn result_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        let result = queue.submit(insert("a"), true).await.unwrap().unwrap();
        assert_eq!(result.scalar_i64(), Some(1));
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn fire_and_forget_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        assert!(queue.submit(insert("a"), false).await.unwrap().is_none());
        queue.stop().await.unwrap();
        assert_eq!(queue.stats().executed, 2);
    }

    #[tokio::test]
    async fn failure_is_scoped_to_its_operation() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;

        let _ = queue.submit(insert("dup"), true).await.unwrap();
        let err = queue.submit(insert("dup"), true).await.unwrap_err();
        assert!(err.is_constraint_violation());

        let next = queue.submit(insert("other"), true).await.unwrap().unwrap();
        assert_eq!(next.scalar_i64(), Some(2));

        queue.stop().await.unwrap();
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.executed, 3);
    }

    #[tokio::test]
    async fn error_hook_runs_for_fire_and_forget() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        let (seen_tx, seen_rx) = std_mpsc::channel();

        let op = WriteOperation::statement("INSERT INTO missing VALUES (1)", vec![])
            .on_error(move |e| {
                let _ = seen_tx.send(e.to_string());
            });
        let _ = queue.submit(op, false).await.unwrap();
        queue.stop().await.unwrap();

        assert!(seen_rx.try_recv().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn submit_batch_queues_each_set() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        let sets = ["a", "b", "a", "c"]
            .iter()
            .map(|n| vec![Value::Text((*n).to_string())])
            .collect();
        let queued = queue
            .submit_batch("INSERT INTO items (name) VALUES (?)", sets)
            .unwrap();
        assert_eq!(queued, 4);
        queue.stop().await.unwrap();

        // the duplicate fails alone
        let stats = queue.stats();
        assert_eq!(stats.executed, 1 + 3);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.capacity = 1;
        let queue = started(cfg).await;

        let (entered_tx, entered_rx) = std_mpsc::channel::<()>();
        let (release_tx, release_rx) = std_mpsc::channel::<()>();
        let blocker = WriteOperation::apply(move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv();
            Ok(QueryResult::default())
        });
        let _ = queue.submit(blocker, false).await.unwrap();
        entered_rx.recv().unwrap();

        // worker is busy: one slot, then full
        let _ = queue.submit(insert("a"), false).await.unwrap();
        assert_matches!(
            queue.submit(insert("b"), false).await,
            Err(StoreError::QueueFull { capacity: 1 })
        );

        release_tx.send(()).unwrap();
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.checkpoint = CheckpointPolicy {
            threshold: 5,
            interval: Duration::from_secs(3600),
        };
        // the CREATE TABLE counts as the first commit
        let queue = started(cfg).await;
        for name in ["a", "b", "c", "d"] {
            let _ = queue.submit(insert(name), true).await.unwrap();
        }
        queue.stop().await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.checkpoints, 1);
        assert_eq!(stats.pending_since_checkpoint, 0);
    }

    #[tokio::test]
    async fn shutdown_checkpoints_leftover_commits() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.checkpoint = CheckpointPolicy {
            threshold: 5,
            interval: Duration::from_secs(3600),
        };
        let queue = started(cfg).await;
        for name in ["a", "b", "c", "d", "e", "f"] {
            let _ = queue.submit(insert(name), true).await.unwrap();
        }
        queue.stop().await.unwrap();

        // one at five commits, one on shutdown for the remaining two
        assert_eq!(queue.stats().checkpoints, 2);
    }

    #[tokio::test]
    async fn idle_worker_checkpoints_on_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&dir);
        cfg.checkpoint = CheckpointPolicy {
            threshold: 1000,
            interval: Duration::from_millis(50),
        };
        let queue = started(cfg).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(queue.stats().checkpoints >= 1);
        assert_eq!(queue.stats().pending_since_checkpoint, 0);
        queue.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_twice_is_noop_and_submit_after_stop_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        queue.stop().await.unwrap();
        queue.stop().await.unwrap();
        assert!(!queue.stats().running);
        assert_matches!(
            queue.submit(insert("late"), true).await,
            Err(StoreError::QueueClosed)
        );
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let queue = started(config(&dir)).await;
        queue.stop().await.unwrap();
        queue.start().unwrap();
        let result = queue.submit(insert("again"), true).await.unwrap().unwrap();
        assert_eq!(result.scalar_i64(), Some(1));
        queue.stop().await.unwrap();
    }

    #[test]
    fn from_settings() {
        let settings = DatabaseSettings {
            writer_queue_capacity: 8,
            writer_idle_tick_ms: 250,
            checkpoint_threshold: 10,
            ..DatabaseSettings::default()
        };
        let cfg = WriteQueueConfig::from_settings(&settings);
        assert_eq!(cfg.capacity, 8);
        assert_eq!(cfg.idle_tick, Duration::from_millis(250));
        assert_eq!(cfg.checkpoint.threshold, 10);
    }
}
