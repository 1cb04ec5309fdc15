//! Process wiring.
//!
//! Startup order: create the database directory, start the single writer,
//! bootstrap the schema through it, sweep sessions left expired by the last
//! run. Shutdown stops the sweeper first so nothing enqueues behind the
//! writer's final drain.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use mailroom_auth::{
    AuthEventLog, Authenticator, LockoutPolicy, LockoutTracker, PasswordHasher, SessionConfig,
    SessionManager, UserDirectory,
};
use mailroom_core::{Clock, SystemClock};
use mailroom_settings::MailroomSettings;
use mailroom_store::{
    ConnectionConfig, ReadAccessor, RetryingWriter, WriteQueue, WriteQueueConfig, WriterStats,
    schema,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running store with its session upkeep.
pub struct App {
    settings: MailroomSettings,
    clock: Arc<dyn Clock>,
    writer: Arc<RetryingWriter>,
    reads: ReadAccessor,
    sessions: Arc<SessionManager>,
    cancel: CancellationToken,
    sweeper: Option<JoinHandle<()>>,
}

impl App {
    /// Start on the system clock.
    pub async fn start(settings: MailroomSettings) -> Result<Self> {
        Self::start_with_clock(settings, Arc::new(SystemClock)).await
    }

    /// Start with an explicit clock.
    pub async fn start_with_clock(settings: MailroomSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        ensure_parent_dir(&settings.database.path)?;

        let queue = Arc::new(WriteQueue::new(WriteQueueConfig::from_settings(
            &settings.database,
        )));
        queue
            .start()
            .with_context(|| format!("Failed to open database {}", settings.database.path.display()))?;

        let writer = Arc::new(RetryingWriter::from_settings(queue, &settings));
        let applied = match schema::bootstrap(&writer).await {
            Ok(applied) => applied,
            Err(e) => return abort_startup(&writer, e, "Failed to bootstrap schema").await,
        };

        let reads = ReadAccessor::new(ConnectionConfig::from_settings(&settings.database));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&writer),
            reads.clone(),
            Arc::clone(&clock),
            SessionConfig::from_settings(&settings.security),
        ));

        let swept = match sessions.sweep_expired().await {
            Ok(swept) => swept,
            Err(e) => return abort_startup(&writer, e, "Failed to sweep expired sessions").await,
        };

        info!(
            path = %settings.database.path.display(),
            migrations_applied = applied,
            expired_sessions_swept = swept,
            "store ready"
        );

        Ok(Self {
            settings,
            clock,
            writer,
            reads,
            sessions,
            cancel: CancellationToken::new(),
            sweeper: None,
        })
    }

    /// Effective settings.
    pub fn settings(&self) -> &MailroomSettings {
        &self.settings
    }

    /// The retrying write façade.
    pub fn writer(&self) -> &Arc<RetryingWriter> {
        &self.writer
    }

    /// Read access.
    pub fn reads(&self) -> &ReadAccessor {
        &self.reads
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Writer counters.
    pub fn stats(&self) -> WriterStats {
        self.writer.queue().stats()
    }

    /// Login flow over this store, using the caller's password scheme.
    pub fn authenticator(&self, hasher: Arc<dyn PasswordHasher>) -> Authenticator {
        Authenticator::new(
            UserDirectory::new(
                Arc::clone(&self.writer),
                self.reads.clone(),
                Arc::clone(&self.clock),
            ),
            Arc::clone(&self.sessions),
            LockoutTracker::new(
                Arc::clone(&self.writer),
                self.reads.clone(),
                Arc::clone(&self.clock),
                LockoutPolicy::from_settings(&self.settings.security),
            ),
            AuthEventLog::new(
                Arc::clone(&self.writer),
                self.reads.clone(),
                Arc::clone(&self.clock),
            ),
            hasher,
        )
    }

    /// Start the periodic session sweep. Idempotent.
    pub fn spawn_sweeper(&mut self) {
        if self.sweeper.is_some() {
            warn!("session sweeper is already running");
            return;
        }
        let interval = self.settings.security.session_sweep_interval();
        self.sweeper = Some(self.sessions.spawn_sweeper(interval, self.cancel.child_token()));
        info!(interval_secs = interval.as_secs(), "session sweeper started");
    }

    /// Stop the sweeper, then drain and stop the writer.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.sweeper.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "session sweeper ended abnormally");
            }
        }

        self.writer
            .queue()
            .stop()
            .await
            .context("Failed to stop write queue")?;
        let stats = self.stats();
        info!(
            executed = stats.executed,
            failed = stats.failed,
            checkpoints = stats.checkpoints,
            retries = self.writer.total_retries(),
            "store stopped"
        );
        Ok(())
    }
}

/// Stop the writer so its thread does not outlive a failed startup.
async fn abort_startup<E>(writer: &RetryingWriter, error: E, what: &'static str) -> Result<App>
where
    E: std::error::Error + Send + Sync + 'static,
{
    if let Err(stop) = writer.queue().stop().await {
        warn!(error = %stop, "write queue did not stop cleanly after failed startup");
    }
    Err(error).context(what)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}
