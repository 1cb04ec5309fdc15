//! Authentication error types.

use chrono::{DateTime, Utc};
use mailroom_store::StoreError;
use thiserror::Error;

/// Errors returned by session, lockout and login operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The store failed underneath the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Unknown username or wrong password. Deliberately indistinguishable.
    #[error("invalid username or password")]
    InvalidCredentials,

    /// The account is locked. `until` is absent when the lockout state could
    /// not be read and the login was refused to be safe.
    #[error("account locked{}", locked_suffix(.until))]
    AccountLocked {
        /// When the lock expires.
        until: Option<DateTime<Utc>>,
    },

    /// The account exists but is deactivated.
    #[error("account is inactive")]
    AccountInactive,

    /// The password hashing capability failed.
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl AuthError {
    /// Whether the failure is the caller's (bad credentials, locked,
    /// inactive) rather than the system's.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::AccountLocked { .. } | Self::AccountInactive
        )
    }
}

fn locked_suffix(until: &Option<DateTime<Utc>>) -> String {
    until.map(|u| format!(" until {}", u.to_rfc3339())).unwrap_or_default()
}

/// Convenience type alias for auth results.
pub type Result<T> = std::result::Result<T, AuthError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
