//! The relational contract and its bootstrap.
//!
//! Migrations are embedded at compile time and applied in version order.
//! [`run_migrations`] does not open its own transaction: [`bootstrap`] runs
//! it as a single closure operation on the write queue, so either every
//! pending migration lands or none does, and the schema is created by the
//! one writer like any other mutation.
//!
//! The `schema_version` table records what has been applied; running again
//! is a no-op.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::operation::QueryResult;
use crate::retry::RetryingWriter;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "accounts, sessions, auth events, recipients, packages, attachments",
    sql: include_str!("v001_schema.sql"),
}];

/// Application tables, in dependency order.
pub const TABLES: &[&str] = &[
    "users",
    "sessions",
    "auth_events",
    "recipients",
    "packages",
    "package_events",
    "attachments",
];

/// Apply every pending migration on `conn`, inside the caller's transaction.
///
/// Returns how many migrations were applied.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
           version     INTEGER PRIMARY KEY,
           applied_at  TEXT    NOT NULL,
           description TEXT
         );",
    )
    .map_err(|e| migration_error("create schema_version", &e))?;

    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version <= current {
            debug!(version = migration.version, "migration already applied, skipping");
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        conn.execute_batch(migration.sql)
            .map_err(|e| migration_error(&format!("v{}", migration.version), &e))?;
        let _ = conn
            .execute(
                "INSERT INTO schema_version (version, applied_at, description)
                 VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), ?2)",
                rusqlite::params![migration.version, migration.description],
            )
            .map_err(|e| migration_error("record version", &e))?;
        applied += 1;
    }

    Ok(applied)
}

/// Highest applied migration version, or 0 on a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_error("read schema_version", &e))
}

/// Latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Create or upgrade the schema through the writer.
///
/// Returns how many migrations were applied.
pub async fn bootstrap(writer: &RetryingWriter) -> Result<u32> {
    let result = writer
        .apply(|conn| {
            let applied = run_migrations(conn)?;
            Ok(QueryResult::affected(applied as usize))
        })
        .await?;
    let applied = u32::try_from(result.rows_affected).unwrap_or(u32::MAX);
    if applied > 0 {
        info!(applied, version = latest_version(), "schema bootstrapped");
    } else {
        debug!(version = latest_version(), "schema up to date");
    }
    Ok(applied)
}

fn migration_error(step: &str, e: &rusqlite::Error) -> StoreError {
    StoreError::InvalidOperation(format!("migration {step} failed: {e}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
