//! Retrying write façade over the [`WriteQueue`].
//!
//! Each call gets up to `max_attempts` tries. After failed attempt *i*
//! (0-indexed) that will be retried, the façade sleeps `base_delay * 2^i`.
//! Only transient errors ([`StoreError::is_transient`]) are retried; the
//! last error is returned unchanged. A retry resubmits the whole logical
//! call, so statements should be idempotent or guarded.
//!
//! Result-requesting calls are bounded by the write timeout. A timed-out
//! operation is still queued and will run; the caller just stops waiting,
//! which is why [`StoreError::Timeout`] is not retried.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mailroom_core::retry::RetryPolicy;
use mailroom_settings::MailroomSettings;
use rusqlite::Connection;
use tracing::{error, warn};

use crate::errors::{Result, StoreError};
use crate::operation::{Params, QueryResult, WriteOperation, execute_statement};
use crate::write_queue::WriteQueue;

/// Default time a caller waits for a write result.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry and timeout envelope around a shared [`WriteQueue`].
#[derive(Debug)]
pub struct RetryingWriter {
    queue: Arc<WriteQueue>,
    policy: RetryPolicy,
    write_timeout: Duration,
    retries: AtomicU64,
}

impl RetryingWriter {
    /// Wrap `queue` with the given retry policy and the default timeout.
    pub fn new(queue: Arc<WriteQueue>, policy: RetryPolicy) -> Self {
        Self {
            queue,
            policy,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            retries: AtomicU64::new(0),
        }
    }

    /// Wrap `queue` using the `retry` and `database` settings sections.
    pub fn from_settings(queue: Arc<WriteQueue>, settings: &MailroomSettings) -> Self {
        Self::new(queue, settings.retry.clone()).with_write_timeout(settings.database.write_timeout())
    }

    /// Override how long callers wait for a result.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// The underlying queue.
    pub fn queue(&self) -> &Arc<WriteQueue> {
        &self.queue
    }

    /// Retries performed since construction.
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Execute one statement.
    ///
    /// Returns `Some(result)` when `want_result` is set, `None` otherwise.
    pub async fn execute(
        &self,
        sql: &str,
        params: Params,
        want_result: bool,
    ) -> Result<Option<QueryResult>> {
        self.with_retry(sql, || {
            self.submit(WriteOperation::statement(sql, params.clone()), want_result)
        })
        .await
    }

    /// Execute one statement and wait for its result.
    pub async fn execute_awaited(&self, sql: &str, params: Params) -> Result<QueryResult> {
        self.execute(sql, params, true)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Queue one fire-and-forget statement per parameter set.
    ///
    /// A retry after a partially queued batch requeues the whole batch.
    pub async fn execute_many(&self, sql: &str, param_sets: Vec<Params>) -> Result<usize> {
        self.with_retry(sql, || {
            let sets = param_sets.clone();
            async move { self.queue.submit_batch(sql, sets) }
        })
        .await
    }

    /// Run statements in order, each in its own transaction, waiting for each.
    ///
    /// Best-effort: a failure leaves earlier statements committed. On a
    /// transient failure the whole sequence is retried from the start.
    pub async fn execute_sequence(&self, statements: Vec<(String, Params)>) -> Result<Vec<QueryResult>> {
        self.with_retry("sequence", || {
            let statements = statements.clone();
            async move {
                let mut results = Vec::with_capacity(statements.len());
                for (sql, params) in statements {
                    let result = self
                        .submit(WriteOperation::statement(sql, params), true)
                        .await?
                        .unwrap_or_default();
                    results.push(result);
                }
                Ok(results)
            }
        })
        .await
    }

    /// Run statements in order as one operation in one transaction.
    ///
    /// All-or-nothing. Returns the total number of rows changed.
    pub async fn execute_in_transaction(&self, statements: Vec<(String, Params)>) -> Result<usize> {
        let result = self
            .apply(move |conn| {
                let mut total = 0;
                for (sql, params) in &statements {
                    total += execute_statement(conn, sql, params)?.rows_affected;
                }
                Ok(QueryResult::affected(total))
            })
            .await?;
        Ok(result.rows_affected)
    }

    /// Run a closure on the writer's connection inside one transaction,
    /// waiting for its result. The closure may be invoked again on retry.
    pub async fn apply<F>(&self, f: F) -> Result<QueryResult>
    where
        F: Fn(&Connection) -> Result<QueryResult> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.with_retry("closure", || {
            let f = Arc::clone(&f);
            self.submit(WriteOperation::apply(move |conn| f(conn)), true)
        })
        .await
        .map(Option::unwrap_or_default)
    }

    async fn submit(&self, op: WriteOperation, want_result: bool) -> Result<Option<QueryResult>> {
        if !want_result {
            return self.queue.submit(op, false).await;
        }
        tokio::time::timeout(self.write_timeout, self.queue.submit(op, true))
            .await
            .map_err(|_| StoreError::Timeout(self.write_timeout))?
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err),
            };

            let Some(delay) = self.policy.delay_after(attempt) else {
                error!(
                    operation = %short(what),
                    attempts = attempt + 1,
                    error = %err,
                    "write failed after retries"
                );
                return Err(err);
            };

            let _ = self.retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation = %short(what),
                attempt = attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "transient write failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn short(sql: &str) -> String {
    sql.trim().lines().next().unwrap_or_default().chars().take(80).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
