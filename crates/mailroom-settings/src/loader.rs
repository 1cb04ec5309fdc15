//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MailroomSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `MAILROOM_*` environment overrides
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{MAX_INTERVAL_SECS, MAX_POLICY_DURATION_SECS, MailroomSettings};

/// Resolve the default settings file path (`~/.mailroom/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".mailroom").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MailroomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults (plus env overrides). Invalid JSON or a
/// value that fails validation is an error.
pub fn load_settings_from_path(path: &Path) -> Result<MailroomSettings> {
    let defaults = serde_json::to_value(MailroomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MailroomSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `MAILROOM_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut MailroomSettings) {
    apply_overrides_from(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
///
/// Integers must parse and fall within the stated range; booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Anything else is logged
/// and ignored.
pub(crate) fn apply_overrides_from(
    settings: &mut MailroomSettings,
    lookup: &dyn Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    // ── Database ────────────────────────────────────────────────────
    if let Some(v) = env.string("MAILROOM_DB_PATH") {
        settings.database.path = PathBuf::from(v);
    }
    if let Some(v) = env.u64("MAILROOM_CHECKPOINT_INTERVAL_SECS", 1, MAX_INTERVAL_SECS) {
        settings.database.checkpoint_interval_secs = v;
    }
    if let Some(v) = env.u32("MAILROOM_CHECKPOINT_THRESHOLD", 1, 1_000_000) {
        settings.database.checkpoint_threshold = v;
    }
    if let Some(v) = env.usize("MAILROOM_WRITER_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.database.writer_queue_capacity = v;
    }
    if let Some(v) = env.u64("MAILROOM_BUSY_TIMEOUT_MS", 0, 600_000) {
        settings.database.busy_timeout_ms = v;
    }
    if let Some(v) = env.u64("MAILROOM_WRITE_TIMEOUT_MS", 100, 600_000) {
        settings.database.write_timeout_ms = v;
    }

    // ── Security ────────────────────────────────────────────────────
    if let Some(v) = env.u64("MAILROOM_SESSION_TIMEOUT_SECS", 60, MAX_POLICY_DURATION_SECS) {
        settings.security.session_timeout_secs = v;
    }
    if let Some(v) = env.u32("MAILROOM_MAX_CONCURRENT_SESSIONS", 1, 100) {
        settings.security.max_concurrent_sessions = v;
    }
    if let Some(v) = env.u32("MAILROOM_MAX_FAILED_LOGINS", 1, 1000) {
        settings.security.max_failed_logins = v;
    }
    if let Some(v) = env.u64("MAILROOM_LOCKOUT_DURATION_SECS", 1, MAX_POLICY_DURATION_SECS) {
        settings.security.account_lockout_duration_secs = v;
    }
    if let Some(v) = env.u64("MAILROOM_SESSION_SWEEP_INTERVAL_SECS", 1, MAX_INTERVAL_SECS) {
        settings.security.session_sweep_interval_secs = v;
    }

    // ── Retry ───────────────────────────────────────────────────────
    if let Some(v) = env.u32("MAILROOM_RETRY_MAX_ATTEMPTS", 1, 20) {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = env.u64("MAILROOM_RETRY_BASE_DELAY_MS", 0, 60_000) {
        settings.retry.base_delay_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("MAILROOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("MAILROOM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as an integer within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
    {
        let val = (self.lookup)(name)?;
        let result = parse_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, %min, %max, "out-of-range env var, ignoring");
        }
        result
    }

    fn u32(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.ranged(name, min, max)
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.ranged(name, min, max)
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.ranged(name, min, max)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
