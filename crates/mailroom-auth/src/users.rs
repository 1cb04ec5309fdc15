//! Credential lookup and user provisioning.

use std::sync::Arc;

use mailroom_core::{Clock, UserId, format_timestamp};
use mailroom_store::{ReadAccessor, RetryingWriter, Value};
use rusqlite::OptionalExtension;
use tracing::info;

use crate::errors::Result;
use crate::password::PasswordHasher;
use crate::rows::{PRINCIPAL_COLUMNS, PrincipalRow};
use crate::types::{Credentials, NewUser, Principal};

/// Accounts as the auth flow sees them.
pub struct UserDirectory {
    writer: Arc<RetryingWriter>,
    reads: ReadAccessor,
    clock: Arc<dyn Clock>,
}

impl UserDirectory {
    /// Create a directory.
    pub fn new(writer: Arc<RetryingWriter>, reads: ReadAccessor, clock: Arc<dyn Clock>) -> Self {
        Self {
            writer,
            reads,
            clock,
        }
    }

    /// Principal and password hash for `username`.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<Credentials>> {
        let username = username.to_owned();
        let found = self
            .reads
            .with_connection(move |conn| {
                let sql = format!(
                    "SELECT {PRINCIPAL_COLUMNS}, u.password_hash FROM users u WHERE u.username = ?1"
                );
                Ok(conn
                    .query_row(&sql, [&username], |row| {
                        Ok((PrincipalRow::read(row, 0)?, row.get::<_, String>(6)?))
                    })
                    .optional()?)
            })
            .await?;

        let Some((principal, password_hash)) = found else {
            return Ok(None);
        };
        Ok(Some(Credentials {
            principal: Principal::try_from(principal)?,
            password_hash,
        }))
    }

    /// Principal by ID.
    pub async fn find_by_id(&self, user_id: &UserId) -> Result<Option<Principal>> {
        let id = user_id.as_str().to_owned();
        let found = self
            .reads
            .with_connection(move |conn| {
                let sql = format!("SELECT {PRINCIPAL_COLUMNS} FROM users u WHERE u.id = ?1");
                Ok(conn
                    .query_row(&sql, [&id], |row| PrincipalRow::read(row, 0))
                    .optional()?)
            })
            .await?;
        Ok(found.map(Principal::try_from).transpose()?)
    }

    /// Hash the password and insert the user, waiting for the write.
    ///
    /// A taken username fails with a constraint violation, which the writer
    /// does not retry.
    pub async fn create_user(
        &self,
        new_user: NewUser<'_>,
        hasher: &dyn PasswordHasher,
    ) -> Result<Principal> {
        let password_hash = hasher.hash(new_user.password)?;
        let principal = Principal {
            id: UserId::new(),
            username: new_user.username.to_owned(),
            full_name: new_user.full_name.to_owned(),
            role: new_user.role,
            is_active: true,
            must_change_password: new_user.must_change_password,
        };
        let now = Value::Text(format_timestamp(self.clock.now()));

        let _ = self
            .writer
            .execute_awaited(
                "INSERT INTO users
                   (id, username, password_hash, full_name, role, is_active,
                    must_change_password, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
                vec![
                    Value::Text(principal.id.as_str().to_owned()),
                    Value::Text(principal.username.clone()),
                    Value::Text(password_hash),
                    Value::Text(principal.full_name.clone()),
                    Value::Text(principal.role.as_str().to_owned()),
                    Value::Integer(i64::from(principal.must_change_password)),
                    now.clone(),
                    now,
                ],
            )
            .await?;

        info!(user_id = %principal.id, username = %principal.username, role = %principal.role, "user created");
        Ok(principal)
    }

    /// Activate or deactivate a user. Returns whether the user exists.
    pub async fn set_active(&self, user_id: &UserId, active: bool) -> Result<bool> {
        let result = self
            .writer
            .execute_awaited(
                "UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?",
                vec![
                    Value::Integer(i64::from(active)),
                    Value::Text(format_timestamp(self.clock.now())),
                    Value::Text(user_id.as_str().to_owned()),
                ],
            )
            .await?;
        if result.rows_affected > 0 {
            info!(user_id = %user_id, active, "user activation changed");
        }
        Ok(result.rows_affected > 0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
