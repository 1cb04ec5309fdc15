//! Raw row shapes and their conversion into domain types.
//!
//! Query closures read plain column values into these structs (so they only
//! deal in `rusqlite::Error`); parsing timestamps and enums happens after,
//! reporting bad data as [`StoreError::CorruptRow`].

use chrono::{DateTime, Utc};
use mailroom_core::{SessionId, UserId, parse_timestamp};
use mailroom_store::StoreError;
use rusqlite::Row;

use crate::token::SessionToken;
use crate::types::{Principal, Role, Session};

/// Columns selected for a session, in this order.
pub(crate) const SESSION_COLUMNS: &str = "s.id, s.user_id, s.token, s.expires_at, s.last_activity, \
     s.ip_address, s.user_agent, s.created_at";

/// Columns selected for a principal, in this order.
pub(crate) const PRINCIPAL_COLUMNS: &str =
    "u.id, u.username, u.full_name, u.role, u.is_active, u.must_change_password";

#[derive(Debug)]
pub(crate) struct SessionRow {
    id: String,
    user_id: String,
    token: String,
    expires_at: String,
    last_activity: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: String,
}

impl SessionRow {
    /// Read [`SESSION_COLUMNS`] starting at column `offset`.
    pub(crate) fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            user_id: row.get(offset + 1)?,
            token: row.get(offset + 2)?,
            expires_at: row.get(offset + 3)?,
            last_activity: row.get(offset + 4)?,
            ip_address: row.get(offset + 5)?,
            user_agent: row.get(offset + 6)?,
            created_at: row.get(offset + 7)?,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            expires_at: timestamp("sessions", "expires_at", &row.expires_at)?,
            last_activity: timestamp("sessions", "last_activity", &row.last_activity)?,
            created_at: timestamp("sessions", "created_at", &row.created_at)?,
            id: SessionId::from_string(row.id),
            user_id: UserId::from_string(row.user_id),
            token: SessionToken::from_string(row.token),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
        })
    }
}

#[derive(Debug)]
pub(crate) struct PrincipalRow {
    id: String,
    username: String,
    full_name: String,
    role: String,
    is_active: bool,
    must_change_password: bool,
}

impl PrincipalRow {
    /// Read [`PRINCIPAL_COLUMNS`] starting at column `offset`.
    pub(crate) fn read(row: &Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            username: row.get(offset + 1)?,
            full_name: row.get(offset + 2)?,
            role: row.get(offset + 3)?,
            is_active: row.get(offset + 4)?,
            must_change_password: row.get(offset + 5)?,
        })
    }
}

impl TryFrom<PrincipalRow> for Principal {
    type Error = StoreError;

    fn try_from(row: PrincipalRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|detail| StoreError::CorruptRow {
                table: "users",
                column: "role",
                detail,
            })?;
        Ok(Self {
            id: UserId::from_string(row.id),
            username: row.username,
            full_name: row.full_name,
            role,
            is_active: row.is_active,
            must_change_password: row.must_change_password,
        })
    }
}

/// Parse a stored timestamp, attributing failures to `table.column`.
pub(crate) fn timestamp(
    table: &'static str,
    column: &'static str,
    raw: &str,
) -> Result<DateTime<Utc>, StoreError> {
    parse_timestamp(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("{raw:?}: {e}"),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
