//! Session lifecycle with a per-user concurrency cap.
//!
//! `Active` (expiry in the future) → `Expired` (expiry passed, row may
//! remain) → terminated (row deleted). Only active sessions validate or
//! renew. Creating a session for a user who already has `max_concurrent`
//! live sessions first deletes the oldest ones, so after
//! [`SessionManager::create_session`] returns the user holds at most
//! `max_concurrent`.
//!
//! Mutations go through the writer; lookups through short-lived reads.
//! Validation fails closed: any read error means "not authenticated".

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use mailroom_core::{Clock, SessionId, UserId, format_timestamp};
use mailroom_settings::SecuritySettings;
use mailroom_store::{ReadAccessor, RetryingWriter, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::rows::{PRINCIPAL_COLUMNS, PrincipalRow, SESSION_COLUMNS, SessionRow};
use crate::token::SessionToken;
use crate::types::{ClientInfo, Principal, Session, policy_span};

/// Session policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Live sessions allowed per user (default: 3).
    pub max_concurrent: u32,
    /// Lifetime from creation or renewal (default: 30 minutes).
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            timeout: Duration::seconds(1800),
        }
    }
}

impl SessionConfig {
    /// Build from the `security` settings section.
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        Self {
            max_concurrent: settings.max_concurrent_sessions.max(1),
            timeout: policy_span(settings.session_timeout_secs),
        }
    }
}

/// Issues, validates, renews and revokes sessions.
pub struct SessionManager {
    writer: Arc<RetryingWriter>,
    reads: ReadAccessor,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a manager.
    pub fn new(
        writer: Arc<RetryingWriter>,
        reads: ReadAccessor,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            writer,
            reads,
            clock,
            config,
        }
    }

    /// Active policy.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session for `user_id`, evicting the oldest live sessions
    /// first if the user is at the cap.
    pub async fn create_session(&self, user_id: &UserId, client: &ClientInfo) -> Result<Session> {
        // stored precision, so the returned session equals what a lookup yields
        let now = self.clock.now().trunc_subsecs(3);
        let active = self.active_session_ids(user_id, now).await?;

        let max = self.config.max_concurrent as usize;
        if active.len() >= max {
            let excess = active.len() - max + 1;
            for session_id in active.iter().take(excess) {
                let _ = self
                    .writer
                    .execute(
                        "DELETE FROM sessions WHERE id = ?",
                        vec![text(session_id.as_str())],
                        true,
                    )
                    .await?;
                info!(user_id = %user_id, session_id = %session_id, "evicted oldest session at concurrency cap");
            }
        }

        let session = Session {
            id: SessionId::new(),
            user_id: user_id.clone(),
            token: SessionToken::generate(),
            expires_at: now + self.config.timeout,
            last_activity: now,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            created_at: now,
        };

        let _ = self
            .writer
            .execute(
                "INSERT INTO sessions
                   (id, user_id, token, expires_at, last_activity, ip_address, user_agent, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    text(session.id.as_str()),
                    text(session.user_id.as_str()),
                    text(session.token.as_str()),
                    text(&format_timestamp(session.expires_at)),
                    text(&format_timestamp(session.last_activity)),
                    optional(session.ip_address.as_deref()),
                    optional(session.user_agent.as_deref()),
                    text(&format_timestamp(session.created_at)),
                ],
                true,
            )
            .await?;

        info!(
            user_id = %user_id,
            session_id = %session.id,
            token_prefix = session.token.prefix(),
            "session created"
        );
        Ok(session)
    }

    /// Resolve a token to its session and user.
    ///
    /// `None` for an unknown or expired token, an inactive user, or any
    /// read failure. No side effects.
    pub async fn validate_session(&self, token: &str) -> Option<(Session, Principal)> {
        let now = format_timestamp(self.clock.now());
        let token_owned = token.to_owned();

        let lookup = self
            .reads
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS}, {PRINCIPAL_COLUMNS}
                     FROM sessions s JOIN users u ON u.id = s.user_id
                     WHERE s.token = ?1 AND s.expires_at > ?2"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(rusqlite::params![token_owned, now])?;
                let Some(row) = rows.next()? else {
                    return Ok(None);
                };
                let session = SessionRow::read(row, 0)?;
                let principal = PrincipalRow::read(row, 8)?;
                Ok(Some((Session::try_from(session)?, Principal::try_from(principal)?)))
            })
            .await;

        match lookup {
            Ok(Some((session, principal))) if principal.is_active => Some((session, principal)),
            Ok(Some((session, principal))) => {
                debug!(user_id = %principal.id, session_id = %session.id, "session belongs to inactive user");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(token_prefix = %SessionToken::from(token).prefix(), error = %e, "session validation failed closed");
                None
            }
        }
    }

    /// Extend a live session's expiry and touch its last activity.
    ///
    /// Returns `false` (not an error) when the token is unknown or expired.
    pub async fn renew_session(&self, token: &str) -> Result<bool> {
        let now = self.clock.now();
        let result = self
            .writer
            .execute_awaited(
                "UPDATE sessions SET expires_at = ?1, last_activity = ?2
                 WHERE token = ?3 AND expires_at > ?2",
                vec![
                    text(&format_timestamp(now + self.config.timeout)),
                    text(&format_timestamp(now)),
                    text(token),
                ],
            )
            .await?;
        let renewed = result.rows_affected > 0;
        if !renewed {
            debug!(token_prefix = %SessionToken::from(token).prefix(), "renewal refused: session missing or expired");
        }
        Ok(renewed)
    }

    /// Delete the session with `token` (logout). Returns whether it existed.
    pub async fn terminate_session(&self, token: &str) -> Result<bool> {
        let result = self
            .writer
            .execute_awaited("DELETE FROM sessions WHERE token = ?", vec![text(token)])
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Delete session `session_id` only if it belongs to `user_id`.
    pub async fn terminate_session_by_id(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<bool> {
        let result = self
            .writer
            .execute_awaited(
                "DELETE FROM sessions WHERE id = ? AND user_id = ?",
                vec![text(session_id.as_str()), text(user_id.as_str())],
            )
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Delete every session of `user_id`. Returns how many were removed.
    pub async fn terminate_all_sessions(&self, user_id: &UserId) -> Result<usize> {
        let result = self
            .writer
            .execute_awaited(
                "DELETE FROM sessions WHERE user_id = ?",
                vec![text(user_id.as_str())],
            )
            .await?;
        info!(user_id = %user_id, removed = result.rows_affected, "terminated all sessions");
        Ok(result.rows_affected)
    }

    /// Delete every expired session.
    ///
    /// Returns the number of expired rows counted just before the delete;
    /// a row expiring in between may be deleted without being counted.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = format_timestamp(self.clock.now());
        let cutoff = now.clone();
        let expired: i64 = self
            .reads
            .with_connection(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sessions WHERE expires_at <= ?1",
                    [&cutoff],
                    |row| row.get(0),
                )?)
            })
            .await?;

        if expired > 0 {
            let _ = self
                .writer
                .execute_awaited("DELETE FROM sessions WHERE expires_at <= ?", vec![text(&now)])
                .await?;
            info!(expired, "swept expired sessions");
        }
        Ok(usize::try_from(expired).unwrap_or_default())
    }

    /// Live sessions of `user_id`, most recently active first.
    pub async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<Session>> {
        let now = format_timestamp(self.clock.now());
        let user = user_id.as_str().to_owned();
        let rows = self
            .reads
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions s
                     WHERE s.user_id = ?1 AND s.expires_at > ?2
                     ORDER BY s.last_activity DESC, s.rowid DESC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(rusqlite::params![user, now], |row| SessionRow::read(row, 0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(Session::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Run [`Self::sweep_expired`] every `interval` until `cancel` fires.
    ///
    /// The first sweep happens one interval after spawning; sweep at startup
    /// explicitly if needed.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: StdDuration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately once
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep_expired().await {
                            warn!(error = %e, "periodic session sweep failed");
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }

    async fn active_session_ids(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Vec<SessionId>> {
        let now = format_timestamp(now);
        let user = user_id.as_str().to_owned();
        let ids = self
            .reads
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM sessions
                     WHERE user_id = ?1 AND expires_at > ?2
                     ORDER BY created_at ASC, rowid ASC",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![user, now], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids.into_iter().map(SessionId::from_string).collect())
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_owned())
}

fn optional(s: Option<&str>) -> Value {
    s.map_or(Value::Null, text)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
