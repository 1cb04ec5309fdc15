//! Failed-login counting and time-boxed account lockout.
//!
//! The counter lives on the user row and is cumulative: it only resets on a
//! successful login. Reaching the threshold stamps `locked_until`; the lock
//! lifts by itself once that instant passes.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use mailroom_core::{Clock, format_timestamp};
use mailroom_settings::SecuritySettings;
use mailroom_store::{ReadAccessor, RetryingWriter, Value};
use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::rows::timestamp;
use crate::types::policy_span;

/// Lockout policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Failures that trigger a lock (default: 5).
    pub max_failed: u32,
    /// How long a lock lasts (default: 30 minutes).
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed: 5,
            duration: Duration::seconds(1800),
        }
    }
}

impl LockoutPolicy {
    /// Build from the `security` settings section.
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        Self {
            max_failed: settings.max_failed_logins.max(1),
            duration: policy_span(settings.account_lockout_duration_secs),
        }
    }
}

/// Lock state of an account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockoutStatus {
    /// Logins are refused.
    pub is_locked: bool,
    /// Stored lock expiry, present even when it has already passed.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Result of recording one failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Counter value after this failure.
    pub failed_count: u32,
    /// Set when this failure locked the account.
    pub locked_until: Option<DateTime<Utc>>,
}

/// Reads and updates lockout state keyed by username.
pub struct LockoutTracker {
    writer: Arc<RetryingWriter>,
    reads: ReadAccessor,
    clock: Arc<dyn Clock>,
    policy: LockoutPolicy,
}

impl LockoutTracker {
    /// Create a tracker.
    pub fn new(
        writer: Arc<RetryingWriter>,
        reads: ReadAccessor,
        clock: Arc<dyn Clock>,
        policy: LockoutPolicy,
    ) -> Self {
        Self {
            writer,
            reads,
            clock,
            policy,
        }
    }

    /// Active policy.
    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    /// Whether `username` is currently locked. Unknown users are not.
    pub async fn check_lockout(&self, username: &str) -> Result<LockoutStatus> {
        let username = username.to_owned();
        let raw: Option<Option<String>> = self
            .reads
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT locked_until FROM users WHERE username = ?1",
                        [&username],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;

        let Some(Some(raw)) = raw else {
            return Ok(LockoutStatus::default());
        };
        let locked_until = timestamp("users", "locked_until", &raw)?;
        Ok(LockoutStatus {
            is_locked: locked_until > self.clock.now(),
            locked_until: Some(locked_until),
        })
    }

    /// Count one failed attempt, locking the account at the threshold.
    ///
    /// `None` when no such user exists.
    pub async fn record_failure(&self, username: &str) -> Result<Option<FailureOutcome>> {
        let lookup = username.to_owned();
        let current: Option<(String, i64)> = self
            .reads
            .with_connection(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, failed_login_count FROM users WHERE username = ?1",
                        [&lookup],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })
            .await?;

        let Some((user_id, count)) = current else {
            return Ok(None);
        };

        let failed_count = u32::try_from(count).unwrap_or(0).saturating_add(1);
        let now = self.clock.now().trunc_subsecs(3);
        let stamp = Value::Text(format_timestamp(now));

        let locked_until = if failed_count >= self.policy.max_failed {
            let until = now + self.policy.duration;
            let _ = self
                .writer
                .execute_awaited(
                    "UPDATE users SET failed_login_count = ?, locked_until = ?, updated_at = ?
                     WHERE id = ?",
                    vec![
                        Value::Integer(i64::from(failed_count)),
                        Value::Text(format_timestamp(until)),
                        stamp,
                        Value::Text(user_id),
                    ],
                )
                .await?;
            warn!(username, failed_count, locked_until = %until, "account locked after repeated failed logins");
            Some(until)
        } else {
            let _ = self
                .writer
                .execute_awaited(
                    "UPDATE users SET failed_login_count = ?, updated_at = ? WHERE id = ?",
                    vec![
                        Value::Integer(i64::from(failed_count)),
                        stamp,
                        Value::Text(user_id),
                    ],
                )
                .await?;
            None
        };

        Ok(Some(FailureOutcome {
            failed_count,
            locked_until,
        }))
    }

    /// Reset the counter and clear any lock. Returns whether the user exists.
    pub async fn record_success(&self, username: &str) -> Result<bool> {
        let result = self
            .writer
            .execute_awaited(
                "UPDATE users SET failed_login_count = 0, locked_until = NULL, updated_at = ?
                 WHERE username = ?",
                vec![
                    Value::Text(format_timestamp(self.clock.now())),
                    Value::Text(username.to_owned()),
                ],
            )
            .await?;
        if result.rows_affected > 0 {
            debug!(username, "failed-login counter reset");
        }
        Ok(result.rows_affected > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
