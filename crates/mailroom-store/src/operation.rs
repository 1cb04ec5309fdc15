//! Units of work accepted by the write queue.
//!
//! A [`WriteOperation`] is either a single parameterized statement or a
//! closure over the writer's connection. Either way it runs inside its own
//! transaction on the worker: committed on success, rolled back on any
//! error. The optional error hook runs on the worker thread with the error
//! before the error is delivered to the waiting caller.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rusqlite::Connection;
use rusqlite::types::Value;

use crate::errors::{Result, StoreError};

/// Positional parameters bound to `?` placeholders.
pub type Params = Vec<Value>;

/// Side effect run on the worker when an operation fails.
pub type ErrorHook = Box<dyn FnOnce(&StoreError) + Send>;

type ApplyFn = Box<dyn FnOnce(&Connection) -> Result<QueryResult> + Send>;

/// Rows produced by an operation plus its change count.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    /// Column names of the result set (empty for plain DML).
    pub columns: Vec<String>,
    /// Result rows, each one value per column.
    pub rows: Vec<Vec<Value>>,
    /// Rows inserted, updated or deleted.
    pub rows_affected: usize,
}

impl QueryResult {
    /// A result with no rows and the given change count.
    pub fn affected(rows_affected: usize) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Value at `row`, column `name`.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == name)?;
        self.rows.get(row)?.get(col)
    }

    /// First column of the first row as an integer.
    pub fn scalar_i64(&self) -> Option<i64> {
        match self.rows.first()?.first()? {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

enum Work {
    Statement { sql: String, params: Params },
    Apply(ApplyFn),
}

/// One unit of work for the writer.
pub struct WriteOperation {
    work: Work,
    on_error: Option<ErrorHook>,
}

impl WriteOperation {
    /// A single statement with positional parameters.
    pub fn statement(sql: impl Into<String>, params: Params) -> Self {
        Self {
            work: Work::Statement {
                sql: sql.into(),
                params,
            },
            on_error: None,
        }
    }

    /// A closure run against the writer's connection inside the operation's
    /// transaction. Several statements issued here commit or roll back
    /// together.
    pub fn apply<F>(f: F) -> Self
    where
        F: FnOnce(&Connection) -> Result<QueryResult> + Send + 'static,
    {
        Self {
            work: Work::Apply(Box::new(f)),
            on_error: None,
        }
    }

    /// Attach a hook invoked with the error if this operation fails.
    #[must_use]
    pub fn on_error<H>(mut self, hook: H) -> Self
    where
        H: FnOnce(&StoreError) + Send + 'static,
    {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Short description for logs: the statement's first line, or `closure`.
    pub fn describe(&self) -> String {
        match &self.work {
            Work::Statement { sql, .. } => {
                let first = sql.trim().lines().next().unwrap_or_default();
                first.chars().take(80).collect()
            }
            Work::Apply(_) => "closure".to_string(),
        }
    }

    /// Execute in a fresh transaction, invoking the error hook on failure.
    pub(crate) fn run(self, conn: &mut Connection) -> Result<QueryResult> {
        let Self { work, on_error } = self;
        let outcome = catch_unwind(AssertUnwindSafe(|| run_in_transaction(work, conn)))
            .unwrap_or_else(|_| {
                Err(StoreError::InvalidOperation(
                    "write operation panicked".to_string(),
                ))
            });
        if let (Err(err), Some(hook)) = (&outcome, on_error) {
            hook(err);
        }
        outcome
    }
}

impl fmt::Debug for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteOperation")
            .field("work", &self.describe())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

fn run_in_transaction(work: Work, conn: &mut Connection) -> Result<QueryResult> {
    // dropping an uncommitted transaction rolls it back
    let tx = conn.transaction()?;
    let result = match work {
        Work::Statement { sql, params } => execute_statement(&tx, &sql, &params)?,
        Work::Apply(f) => f(&tx)?,
    };
    tx.commit()?;
    Ok(result)
}

/// Run one statement, collecting any rows it returns.
pub(crate) fn execute_statement(conn: &Connection, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    {
        let mut cursor = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        while let Some(row) = cursor.next()? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(row.get::<_, Value>(idx)?);
            }
            rows.push(values);
        }
    }

    let rows_affected = if stmt.readonly() {
        0
    } else {
        usize::try_from(conn.changes()).unwrap_or(usize::MAX)
    };

    Ok(QueryResult {
        columns,
        rows,
        rows_affected,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
