//! Settings types with compiled defaults.
//!
//! Every section is `#[serde(default)]` so a settings file only needs to
//! name the keys it changes. JSON keys are camelCase.

use std::path::PathBuf;
use std::time::Duration;

use mailroom_core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Longest session timeout or lockout window accepted (30 days).
pub const MAX_POLICY_DURATION_SECS: u64 = 2_592_000;

/// Longest checkpoint or sweep interval accepted (one day).
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailroomSettings {
    /// Store file, write queue and checkpoint tuning.
    pub database: DatabaseSettings,
    /// Session and lockout policy.
    pub security: SecuritySettings,
    /// Retry envelope for store writes.
    pub retry: RetryPolicy,
    /// Diagnostics output.
    pub logging: LoggingSettings,
}

impl MailroomSettings {
    /// Reject values that would make a component misbehave.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            (
                "database.checkpointThreshold",
                u64::from(self.database.checkpoint_threshold),
            ),
            (
                "database.checkpointIntervalSecs",
                self.database.checkpoint_interval_secs,
            ),
            (
                "database.writerQueueCapacity",
                self.database.writer_queue_capacity as u64,
            ),
            ("database.writerIdleTickMs", self.database.writer_idle_tick_ms),
            ("database.writeTimeoutMs", self.database.write_timeout_ms),
            (
                "security.maxConcurrentSessions",
                u64::from(self.security.max_concurrent_sessions),
            ),
            (
                "security.sessionTimeoutSecs",
                self.security.session_timeout_secs,
            ),
            (
                "security.maxFailedLogins",
                u64::from(self.security.max_failed_logins),
            ),
            (
                "security.sessionSweepIntervalSecs",
                self.security.session_sweep_interval_secs,
            ),
            (
                "security.accountLockoutDurationSecs",
                self.security.account_lockout_duration_secs,
            ),
            ("retry.maxAttempts", u64::from(self.retry.max_attempts)),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::InvalidValue(format!("{key} must be >= 1")));
        }

        let bounded = [
            (
                "database.checkpointIntervalSecs",
                self.database.checkpoint_interval_secs,
                MAX_INTERVAL_SECS,
            ),
            (
                "security.sessionTimeoutSecs",
                self.security.session_timeout_secs,
                MAX_POLICY_DURATION_SECS,
            ),
            (
                "security.accountLockoutDurationSecs",
                self.security.account_lockout_duration_secs,
                MAX_POLICY_DURATION_SECS,
            ),
            (
                "security.sessionSweepIntervalSecs",
                self.security.session_sweep_interval_secs,
                MAX_INTERVAL_SECS,
            ),
        ];
        if let Some((key, _, max)) = bounded.iter().find(|(_, v, max)| v > max) {
            return Err(SettingsError::InvalidValue(format!("{key} must be <= {max}")));
        }
        Ok(())
    }
}

/// Store and write-queue settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Path of the database file.
    pub path: PathBuf,
    /// Checkpoint at least this often, in seconds (default: 300).
    pub checkpoint_interval_secs: u64,
    /// Checkpoint after this many committed writes (default: 1000).
    pub checkpoint_threshold: u32,
    /// Maximum queued writes before submissions are rejected (default: 1024).
    pub writer_queue_capacity: usize,
    /// How long the idle writer waits before re-checking checkpoints, in ms (default: 1000).
    pub writer_idle_tick_ms: u64,
    /// `SQLite` busy timeout applied to every connection, in ms (default: 5000).
    pub busy_timeout_ms: u64,
    /// How long a caller waits for a write result, in ms (default: 30000).
    pub write_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/mailroom.db"),
            checkpoint_interval_secs: 300,
            checkpoint_threshold: 1000,
            writer_queue_capacity: 1024,
            writer_idle_tick_ms: 1000,
            busy_timeout_ms: 5000,
            write_timeout_ms: 30_000,
        }
    }
}

impl DatabaseSettings {
    /// Checkpoint interval as a [`Duration`].
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }

    /// Idle tick as a [`Duration`].
    pub fn writer_idle_tick(&self) -> Duration {
        Duration::from_millis(self.writer_idle_tick_ms)
    }

    /// Busy timeout as a [`Duration`].
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Session and account lockout settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecuritySettings {
    /// Session lifetime from creation or last renewal, in seconds (default: 1800).
    pub session_timeout_secs: u64,
    /// Live sessions allowed per user (default: 3).
    pub max_concurrent_sessions: u32,
    /// Failed logins that trigger a lockout (default: 5).
    pub max_failed_logins: u32,
    /// Lockout length, in seconds (default: 1800).
    pub account_lockout_duration_secs: u64,
    /// Interval of the background expired-session sweep, in seconds (default: 300).
    pub session_sweep_interval_secs: u64,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            session_timeout_secs: 1800,
            max_concurrent_sessions: 3,
            max_failed_logins: 5,
            account_lockout_duration_secs: 1800,
            session_sweep_interval_secs: 300,
        }
    }
}

impl SecuritySettings {
    /// Sweep interval as a [`Duration`].
    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }
}

/// Diagnostics output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset (default: `info`).
    pub level: String,
    /// Emit one JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let s = MailroomSettings::default();
        assert_eq!(s.database.checkpoint_interval_secs, 300);
        assert_eq!(s.database.checkpoint_threshold, 1000);
        assert_eq!(s.database.writer_idle_tick(), Duration::from_secs(1));
        assert_eq!(s.security.session_timeout_secs, 1800);
        assert_eq!(s.security.max_concurrent_sessions, 3);
        assert_eq!(s.security.max_failed_logins, 5);
        assert_eq!(s.security.account_lockout_duration_secs, 1800);
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.retry.base_delay_ms, 100);
        assert_eq!(s.logging.level, "info");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(MailroomSettings::default()).unwrap();
        assert_eq!(json["security"]["maxConcurrentSessions"], 3);
        assert_eq!(json["database"]["checkpointIntervalSecs"], 300);
        assert_eq!(json["retry"]["baseDelayMs"], 100);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let s: MailroomSettings =
            serde_json::from_str(r#"{"security": {"maxFailedLogins": 10}}"#).unwrap();
        assert_eq!(s.security.max_failed_logins, 10);
        assert_eq!(s.security.max_concurrent_sessions, 3);
        assert_eq!(s.database, DatabaseSettings::default());
    }

    #[test]
    fn validate_rejects_zero_cap() {
        let mut s = MailroomSettings::default();
        s.security.max_concurrent_sessions = 0;
        assert_matches!(
            s.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("maxConcurrentSessions")
        );
    }

    #[test]
    fn validate_rejects_zero_lockout_duration() {
        let mut s = MailroomSettings::default();
        s.security.account_lockout_duration_secs = 0;
        assert_matches!(
            s.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("accountLockoutDurationSecs")
        );
    }

    #[test]
    fn validate_rejects_durations_past_the_ceiling() {
        let mut s = MailroomSettings::default();
        s.security.session_timeout_secs = 10_000_000_000_000_000;
        assert_matches!(
            s.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("sessionTimeoutSecs must be <=")
        );

        let mut s = MailroomSettings::default();
        s.security.account_lockout_duration_secs = MAX_POLICY_DURATION_SECS + 1;
        assert_matches!(
            s.validate(),
            Err(SettingsError::InvalidValue(msg)) if msg.contains("accountLockoutDurationSecs")
        );

        let mut s = MailroomSettings::default();
        s.security.session_timeout_secs = MAX_POLICY_DURATION_SECS;
        s.security.session_sweep_interval_secs = MAX_INTERVAL_SECS;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_queue_capacity() {
        let mut s = MailroomSettings::default();
        s.database.writer_queue_capacity = 0;
        assert!(s.validate().is_err());
    }
}
