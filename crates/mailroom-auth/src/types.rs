//! Session and principal types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use mailroom_core::{SessionId, UserId};
use mailroom_settings::MAX_POLICY_DURATION_SECS;
use serde::{Deserialize, Serialize};

use crate::token::SessionToken;

/// A configured span in seconds, capped at [`MAX_POLICY_DURATION_SECS`] so
/// `now + span` cannot overflow.
pub(crate) fn policy_span(secs: u64) -> Duration {
    let capped = secs.min(MAX_POLICY_DURATION_SECS);
    Duration::seconds(i64::try_from(capped).unwrap_or_default())
}

/// Account role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control including other administrators.
    SuperAdmin,
    /// Manages users and recipients.
    Admin,
    /// Day-to-day package handling.
    Operator,
}

impl Role {
    /// Stored / wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SuperAdmin => "super_admin",
            Self::Admin => "admin",
            Self::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Self::SuperAdmin),
            "admin" => Ok(Self::Admin),
            "operator" => Ok(Self::Operator),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The user a session belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// User ID.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Display name.
    pub full_name: String,
    /// Role.
    pub role: Role,
    /// Deactivated users cannot log in and their sessions do not validate.
    pub is_active: bool,
    /// The user must set a new password before doing anything else.
    pub must_change_password: bool,
}

/// A principal together with its stored password hash.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The account.
    pub principal: Principal,
    /// Opaque hash produced by the configured [`crate::PasswordHasher`].
    pub password_hash: String,
}

/// Input for provisioning a user.
#[derive(Clone, Debug)]
pub struct NewUser<'a> {
    /// Login name (unique).
    pub username: &'a str,
    /// Display name.
    pub full_name: &'a str,
    /// Role.
    pub role: Role,
    /// Plain-text password, hashed before it reaches the store.
    pub password: &'a str,
    /// Force a password change on first login.
    pub must_change_password: bool,
}

/// Where a request came from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Remote address.
    pub ip_address: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Client info from an address and agent string.
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Lifecycle state of a stored session at a given instant.
///
/// A terminated session has no row and therefore no state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Expiry is in the future; the session validates and may be renewed.
    Active,
    /// Expiry has passed; the row may linger until the next sweep.
    Expired,
}

/// A login session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Session ID.
    pub id: SessionId,
    /// Owner.
    pub user_id: UserId,
    /// Bearer token.
    pub token: SessionToken,
    /// The session stops validating at this instant.
    pub expires_at: DateTime<Utc>,
    /// Last successful renewal (or creation).
    pub last_activity: DateTime<Utc>,
    /// Remote address at creation.
    pub ip_address: Option<String>,
    /// `User-Agent` at creation.
    pub user_agent: Option<String>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// State at `now`. Expiry is exclusive: at `expires_at` the session is
    /// already expired.
    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.expires_at > now {
            SessionState::Active
        } else {
            SessionState::Expired
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
