//! Opening `SQLite` connections and short-lived read access.
//!
//! Every connection gets the same pragmas: WAL journaling, a busy timeout,
//! foreign keys on, `synchronous = NORMAL`. Read connections additionally set
//! `query_only`, so a stray mutation through the read path fails instead of
//! becoming a second writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mailroom_settings::DatabaseSettings;
use rusqlite::Connection;
use tracing::debug;

use crate::errors::{Result, StoreError};
use crate::schema;

/// Where the database lives and how connections behave.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How long a statement waits on a locked database before `SQLITE_BUSY`
    /// (default: 5 s).
    pub busy_timeout: Duration,
}

impl ConnectionConfig {
    /// Defaults for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Build from the `database` settings section.
    pub fn from_settings(settings: &DatabaseSettings) -> Self {
        Self {
            path: settings.path.clone(),
            busy_timeout: settings.busy_timeout(),
        }
    }
}

/// Open a read-write connection with the standard pragmas.
///
/// Only the write queue should hold one of these for longer than schema
/// inspection in tests.
pub fn open_connection(config: &ConnectionConfig) -> Result<Connection> {
    open_with(config, false)
}

fn open_with(config: &ConnectionConfig, query_only: bool) -> Result<Connection> {
    let wrap = |source| StoreError::Connection {
        path: config.path.clone(),
        source,
    };

    let conn = Connection::open(&config.path).map_err(wrap)?;
    conn.busy_timeout(config.busy_timeout).map_err(wrap)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\
         PRAGMA foreign_keys = ON;\
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(wrap)?;
    if query_only {
        conn.execute_batch("PRAGMA query_only = ON;").map_err(wrap)?;
    }
    Ok(conn)
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (should be "wal").
    pub journal_mode: String,
    /// Whether foreign keys are enabled.
    pub foreign_keys_enabled: bool,
    /// Whether the connection refuses writes.
    pub query_only: bool,
}

/// Read back the pragmas that matter on a connection.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    let query_only: i32 = conn.query_row("PRAGMA query_only", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        foreign_keys_enabled: foreign_keys == 1,
        query_only: query_only == 1,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Read access
// ─────────────────────────────────────────────────────────────────────────────

/// Opens a fresh query-only connection per call.
///
/// Holds no connection between calls and no shared mutable state, so it is
/// cheap to clone and safe to use from any number of tasks at once. A read
/// observes a write only if the writer committed it before the read began.
#[derive(Clone, Debug)]
pub struct ReadAccessor {
    config: ConnectionConfig,
}

impl ReadAccessor {
    /// Create an accessor for the configured database.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Database path this accessor reads from.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Run `f` on a new read connection on the blocking pool.
    ///
    /// The connection is closed when `f` returns.
    pub async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_with(&config, true)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::BlockingTask(e.to_string()))?
    }

    /// Cheap liveness probe (`SELECT 1`).
    pub async fn ping(&self) -> Result<()> {
        self.with_connection(|conn| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }

    /// Row count of one of the schema's tables.
    ///
    /// Only names in [`schema::TABLES`] are accepted; the name is
    /// interpolated into SQL, so anything else is refused.
    pub async fn table_count(&self, table: &str) -> Result<i64> {
        let Some(table) = schema::TABLES.iter().copied().find(|t| *t == table) else {
            return Err(StoreError::InvalidOperation(format!(
                "unknown table: {table}"
            )));
        };
        debug!(table, "counting rows");
        self.with_connection(move |conn| {
            let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(count)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn bootstrapped(dir: &tempfile::TempDir) -> ConnectionConfig {
        let config = ConnectionConfig::new(dir.path().join("test.db"));
        let mut conn = open_connection(&config).unwrap();
        let tx = conn.transaction().unwrap();
        let _ = schema::run_migrations(&tx).unwrap();
        tx.commit().unwrap();
        config
    }

    #[test]
    fn file_connection_uses_wal_and_foreign_keys() {
        let dir = tempfile::tempdir().unwrap();
        let conn = open_connection(&ConnectionConfig::new(dir.path().join("a.db"))).unwrap();
        let pragmas = verify_pragmas(&conn).unwrap();
        assert_eq!(pragmas.journal_mode, "wal");
        assert!(pragmas.foreign_keys_enabled);
        assert!(!pragmas.query_only);
    }

    #[test]
    fn missing_directory_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectionConfig::new(dir.path().join("missing").join("a.db"));
        assert_matches!(
            open_connection(&config),
            Err(StoreError::Connection { path, .. }) if path.ends_with("a.db")
        );
    }

    #[test]
    fn from_settings_copies_path_and_timeout() {
        let settings = DatabaseSettings {
            path: PathBuf::from("/srv/mailroom.db"),
            busy_timeout_ms: 250,
            ..DatabaseSettings::default()
        };
        let config = ConnectionConfig::from_settings(&settings);
        assert_eq!(config.path, PathBuf::from("/srv/mailroom.db"));
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn read_connections_are_query_only() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ReadAccessor::new(bootstrapped(&dir));

        let state = reads.with_connection(|conn| verify_pragmas(conn)).await.unwrap();
        assert!(state.query_only);

        let write = reads
            .with_connection(|conn| {
                let _ = conn.execute("DELETE FROM sessions", [])?;
                Ok(())
            })
            .await;
        assert_matches!(write, Err(StoreError::Sqlite(_)));
    }

    #[tokio::test]
    async fn ping_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ReadAccessor::new(bootstrapped(&dir));
        reads.ping().await.unwrap();
    }

    #[tokio::test]
    async fn table_count_on_known_table() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ReadAccessor::new(bootstrapped(&dir));
        assert_eq!(reads.table_count("sessions").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn table_count_rejects_unknown_names() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ReadAccessor::new(bootstrapped(&dir));
        assert_matches!(
            reads.table_count("sessions; DROP TABLE users").await,
            Err(StoreError::InvalidOperation(_))
        );
    }

    #[tokio::test]
    async fn concurrent_reads() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ReadAccessor::new(bootstrapped(&dir));
        let pings = (0..8).map(|_| reads.ping());
        for result in futures::future::join_all(pings).await {
            result.unwrap();
        }
    }
}
