//! Authentication audit trail.
//!
//! Events are written fire-and-forget: recording never blocks or fails the
//! authentication outcome it describes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailroom_core::{AuthEventId, Clock, UserId, format_timestamp};
use mailroom_store::{ReadAccessor, RetryingWriter, Value};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::errors::Result;
use crate::rows::timestamp;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    /// Successful login.
    Login,
    /// Rejected login; `details.reason` says why.
    LoginFailed,
    /// Session ended by its owner.
    Logout,
    /// One session revoked administratively.
    SessionRevoked,
    /// Every session of a user revoked.
    SessionsRevokedAll,
}

impl AuthEventKind {
    /// Stored name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Logout => "logout",
            Self::SessionRevoked => "session_revoked",
            Self::SessionsRevokedAll => "sessions_revoked_all",
        }
    }
}

/// An event to record.
#[derive(Clone, Debug)]
pub struct AuthEvent {
    kind: AuthEventKind,
    user_id: Option<UserId>,
    username: Option<String>,
    ip_address: Option<String>,
    details: Option<JsonValue>,
}

impl AuthEvent {
    /// Start an event of `kind`.
    pub fn new(kind: AuthEventKind) -> Self {
        Self {
            kind,
            user_id: None,
            username: None,
            ip_address: None,
            details: None,
        }
    }

    /// Attribute to a user.
    #[must_use]
    pub fn user(mut self, user_id: &UserId) -> Self {
        self.user_id = Some(user_id.clone());
        self
    }

    /// Username as presented (may not exist).
    #[must_use]
    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_owned());
        self
    }

    /// Remote address.
    #[must_use]
    pub fn ip(mut self, ip_address: Option<&str>) -> Self {
        self.ip_address = ip_address.map(str::to_owned);
        self
    }

    /// Structured details, stored as JSON text.
    #[must_use]
    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    /// Event kind.
    pub fn kind(&self) -> AuthEventKind {
        self.kind
    }
}

/// A recorded event as read back.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredAuthEvent {
    /// Event ID.
    pub id: AuthEventId,
    /// Attributed user, if known.
    pub user_id: Option<UserId>,
    /// Stored event name, see [`AuthEventKind::as_str`].
    pub event_type: String,
    /// Presented username.
    pub username: Option<String>,
    /// Remote address.
    pub ip_address: Option<String>,
    /// Parsed details.
    pub details: Option<JsonValue>,
    /// When it was recorded.
    pub created_at: DateTime<Utc>,
}

/// Writes and lists audit events.
pub struct AuthEventLog {
    writer: Arc<RetryingWriter>,
    reads: ReadAccessor,
    clock: Arc<dyn Clock>,
}

impl AuthEventLog {
    /// Create a log.
    pub fn new(writer: Arc<RetryingWriter>, reads: ReadAccessor, clock: Arc<dyn Clock>) -> Self {
        Self {
            writer,
            reads,
            clock,
        }
    }

    /// Enqueue `event` without waiting for it to be written.
    ///
    /// Only enqueue failures are visible here, and they are logged rather
    /// than returned.
    pub async fn record(&self, event: AuthEvent) {
        let kind = event.kind;
        let params = vec![
            Value::Text(AuthEventId::new().into_inner()),
            event
                .user_id
                .map_or(Value::Null, |id| Value::Text(id.into_inner())),
            Value::Text(kind.as_str().to_owned()),
            event.username.map_or(Value::Null, Value::Text),
            event.ip_address.map_or(Value::Null, Value::Text),
            event
                .details
                .map_or(Value::Null, |d| Value::Text(d.to_string())),
            Value::Text(format_timestamp(self.clock.now())),
        ];

        if let Err(e) = self
            .writer
            .execute(
                "INSERT INTO auth_events
                   (id, user_id, event_type, username, ip_address, details, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params,
                false,
            )
            .await
        {
            warn!(event_type = kind.as_str(), error = %e, "failed to record auth event");
        }
    }

    /// Most recent events first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<StoredAuthEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .reads
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, event_type, username, ip_address, details, created_at
                     FROM auth_events ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map([limit], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<String>>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(
                |(id, user_id, event_type, username, ip_address, details, created_at)| {
                    Ok(StoredAuthEvent {
                        id: AuthEventId::from_string(id),
                        user_id: user_id.map(UserId::from_string),
                        event_type,
                        username,
                        ip_address,
                        // unparseable details are dropped, the event itself is kept
                        details: details.and_then(|d| serde_json::from_str(&d).ok()),
                        created_at: timestamp("auth_events", "created_at", &created_at)?,
                    })
                },
            )
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
