//! Login and logout.
//!
//! Composes the lockout check, credential lookup, password verification,
//! failure accounting, session creation and the audit trail. Every path
//! that refuses a login records why.

use std::sync::Arc;

use mailroom_core::{SessionId, UserId};
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuthEvent, AuthEventKind, AuthEventLog};
use crate::errors::{AuthError, Result};
use crate::lockout::LockoutTracker;
use crate::password::PasswordHasher;
use crate::sessions::SessionManager;
use crate::types::{ClientInfo, Principal, Session};
use crate::users::UserDirectory;

/// A successful login.
#[derive(Clone, Debug)]
pub struct LoginOutcome {
    /// The new session.
    pub session: Session,
    /// Who logged in.
    pub principal: Principal,
    /// The user must change their password before anything else.
    pub must_change_password: bool,
}

/// The login / logout flow.
pub struct Authenticator {
    users: UserDirectory,
    sessions: Arc<SessionManager>,
    lockout: LockoutTracker,
    audit: AuthEventLog,
    hasher: Arc<dyn PasswordHasher>,
}

impl Authenticator {
    /// Assemble from its parts.
    pub fn new(
        users: UserDirectory,
        sessions: Arc<SessionManager>,
        lockout: LockoutTracker,
        audit: AuthEventLog,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            users,
            sessions,
            lockout,
            audit,
            hasher,
        }
    }

    /// User directory.
    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    /// Session manager.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Lockout tracker.
    pub fn lockout(&self) -> &LockoutTracker {
        &self.lockout
    }

    /// Audit log.
    pub fn audit(&self) -> &AuthEventLog {
        &self.audit
    }

    /// Password capability.
    pub fn hasher(&self) -> &dyn PasswordHasher {
        self.hasher.as_ref()
    }

    /// Authenticate `username` / `password` and open a session.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<LoginOutcome> {
        let ip = client.ip_address.as_deref();

        match self.lockout.check_lockout(username).await {
            Ok(status) if status.is_locked => {
                self.refused(username, None, ip, "account_locked").await;
                return Err(AuthError::AccountLocked {
                    until: status.locked_until,
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(username, error = %e, "lockout state unreadable, refusing login");
                self.refused(username, None, ip, "account_locked").await;
                return Err(AuthError::AccountLocked { until: None });
            }
        }

        let Some(credentials) = self.users.find_by_username(username).await? else {
            self.refused(username, None, ip, "invalid_username").await;
            return Err(AuthError::InvalidCredentials);
        };
        let principal = credentials.principal;

        if !principal.is_active {
            self.refused(username, Some(&principal.id), ip, "account_inactive")
                .await;
            return Err(AuthError::AccountInactive);
        }

        if !self.hasher.verify(password, &credentials.password_hash) {
            let _ = self.lockout.record_failure(username).await?;
            self.refused(username, Some(&principal.id), ip, "invalid_password")
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        let _ = self.lockout.record_success(username).await?;
        let session = self.sessions.create_session(&principal.id, client).await?;

        self.audit
            .record(
                AuthEvent::new(AuthEventKind::Login)
                    .user(&principal.id)
                    .username(username)
                    .ip(ip)
                    .details(json!({ "session_id": session.id.as_str() })),
            )
            .await;
        info!(user_id = %principal.id, username, session_id = %session.id, "login succeeded");

        Ok(LoginOutcome {
            must_change_password: principal.must_change_password,
            session,
            principal,
        })
    }

    /// End the session with `token`. Returns whether it existed.
    pub async fn logout(&self, token: &str, client: &ClientInfo) -> Result<bool> {
        let owner = self.sessions.validate_session(token).await;
        let terminated = self.sessions.terminate_session(token).await?;

        if terminated {
            let mut event = AuthEvent::new(AuthEventKind::Logout).ip(client.ip_address.as_deref());
            if let Some((session, principal)) = &owner {
                event = event
                    .user(&principal.id)
                    .username(&principal.username)
                    .details(json!({ "session_id": session.id.as_str() }));
            }
            self.audit.record(event).await;
        }
        Ok(terminated)
    }

    /// Revoke one of `user_id`'s sessions.
    pub async fn revoke_session(&self, session_id: &SessionId, user_id: &UserId) -> Result<bool> {
        let revoked = self
            .sessions
            .terminate_session_by_id(session_id, user_id)
            .await?;
        if revoked {
            self.audit
                .record(
                    AuthEvent::new(AuthEventKind::SessionRevoked)
                        .user(user_id)
                        .details(json!({ "session_id": session_id.as_str() })),
                )
                .await;
        }
        Ok(revoked)
    }

    /// Revoke every session of `user_id`.
    pub async fn revoke_all(&self, user_id: &UserId) -> Result<usize> {
        let revoked = self.sessions.terminate_all_sessions(user_id).await?;
        self.audit
            .record(
                AuthEvent::new(AuthEventKind::SessionsRevokedAll)
                    .user(user_id)
                    .details(json!({ "count": revoked })),
            )
            .await;
        Ok(revoked)
    }

    async fn refused(&self, username: &str, user_id: Option<&UserId>, ip: Option<&str>, reason: &str) {
        let mut event = AuthEvent::new(AuthEventKind::LoginFailed)
            .username(username)
            .ip(ip)
            .details(json!({ "reason": reason }));
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        self.audit.record(event).await;
        info!(username, reason, "login refused");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::Duration;
    use mailroom_core::ManualClock;
    use mailroom_core::retry::RetryPolicy;
    use mailroom_store::{ConnectionConfig, ReadAccessor, RetryingWriter, WriteQueue, WriteQueueConfig, schema};

    use super::*;
    use crate::lockout::LockoutPolicy;
    use crate::password::MockPasswordHasher;
    use crate::sessions::SessionConfig;
    use crate::types::{NewUser, Role};

    struct Fixture {
        _dir: tempfile::TempDir,
        clock: ManualClock,
        writer: Arc<RetryingWriter>,
        auth: Authenticator,
    }

    /// Hashes as `hashed:<password>` and verifies by comparison.
    fn plain_hasher() -> MockPasswordHasher {
        let mut hasher = MockPasswordHasher::new();
        let _ = hasher
            .expect_hash()
            .returning(|password| Ok(format!("hashed:{password}")));
        let _ = hasher
            .expect_verify()
            .returning(|password, hash| hash == format!("hashed:{password}"));
        hasher
    }

    impl Fixture {
        async fn new(hasher: MockPasswordHasher) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let connection = ConnectionConfig::new(dir.path().join("login.db"));
            let queue = Arc::new(WriteQueue::new(WriteQueueConfig::new(connection.clone())));
            queue.start().unwrap();
            let writer = Arc::new(RetryingWriter::new(queue, RetryPolicy::default()));
            let _ = schema::bootstrap(&writer).await.unwrap();

            let clock = ManualClock::starting_now();
            let reads = ReadAccessor::new(connection);
            let shared_clock: Arc<dyn mailroom_core::Clock> = Arc::new(clock.clone());
            let auth = Authenticator::new(
                UserDirectory::new(Arc::clone(&writer), reads.clone(), Arc::clone(&shared_clock)),
                Arc::new(SessionManager::new(
                    Arc::clone(&writer),
                    reads.clone(),
                    Arc::clone(&shared_clock),
                    SessionConfig::default(),
                )),
                LockoutTracker::new(
                    Arc::clone(&writer),
                    reads.clone(),
                    Arc::clone(&shared_clock),
                    LockoutPolicy {
                        max_failed: 3,
                        duration: Duration::minutes(30),
                    },
                ),
                AuthEventLog::new(Arc::clone(&writer), reads, shared_clock),
                Arc::new(hasher),
            );
            Self {
                _dir: dir,
                clock,
                writer,
                auth,
            }
        }

        async fn provision(&self, username: &str, must_change_password: bool) -> Principal {
            self.auth
                .users()
                .create_user(
                    NewUser {
                        username,
                        full_name: "Test User",
                        role: Role::Operator,
                        password: "s3cret",
                        must_change_password,
                    },
                    self.auth.hasher(),
                )
                .await
                .unwrap()
        }

        async fn reasons(&self) -> Vec<String> {
            // flush fire-and-forget audit writes
            let _ = self.writer.execute_awaited("SELECT 1", vec![]).await.unwrap();
            let mut events = self.auth.audit().recent(100).await.unwrap();
            events.reverse();
            events
                .into_iter()
                .map(|e| match e.details.as_ref().and_then(|d| d.get("reason")) {
                    Some(reason) => format!("{}:{}", e.event_type, reason.as_str().unwrap()),
                    None => e.event_type,
                })
                .collect()
        }

        async fn stop(self) {
            self.writer.queue().stop().await.unwrap();
        }
    }

    fn client() -> ClientInfo {
        ClientInfo::new("192.168.1.20", "scanner/2.1")
    }

    #[tokio::test]
    async fn successful_login_opens_session() {
        let fx = Fixture::new(plain_hasher()).await;
        let ada = fx.provision("ada", true).await;

        let outcome = fx.auth.login("ada", "s3cret", &client()).await.unwrap();
        assert_eq!(outcome.principal.id, ada.id);
        assert!(outcome.must_change_password);

        let (session, principal) = fx
            .auth
            .sessions()
            .validate_session(outcome.session.token.as_str())
            .await
            .unwrap();
        assert_eq!(session.id, outcome.session.id);
        assert_eq!(principal.username, "ada");
        assert_eq!(fx.reasons().await, vec!["login"]);
        fx.stop().await;
    }

    #[tokio::test]
    async fn unknown_user_is_invalid_credentials() {
        let mut hasher = MockPasswordHasher::new();
        let _ = hasher.expect_verify().never();
        let fx = Fixture::new(hasher).await;

        assert_matches!(
            fx.auth.login("nobody", "x", &client()).await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(fx.reasons().await, vec!["login_failed:invalid_username"]);
        fx.stop().await;
    }

    #[tokio::test]
    async fn inactive_user_is_refused() {
        let fx = Fixture::new(plain_hasher()).await;
        let ada = fx.provision("ada", false).await;
        assert!(fx.auth.users().set_active(&ada.id, false).await.unwrap());

        assert_matches!(
            fx.auth.login("ada", "s3cret", &client()).await,
            Err(AuthError::AccountInactive)
        );
        assert_eq!(fx.reasons().await, vec!["login_failed:account_inactive"]);
        fx.stop().await;
    }

    #[tokio::test]
    async fn repeated_bad_passwords_lock_the_account() {
        let fx = Fixture::new(plain_hasher()).await;
        let _ = fx.provision("ada", false).await;

        for _ in 0..3 {
            assert_matches!(
                fx.auth.login("ada", "wrong", &client()).await,
                Err(AuthError::InvalidCredentials)
            );
        }

        // even the right password is refused while locked
        let err = fx.auth.login("ada", "s3cret", &client()).await.unwrap_err();
        assert_matches!(err, AuthError::AccountLocked { until: Some(_) });
        assert_eq!(
            fx.reasons().await,
            vec![
                "login_failed:invalid_password",
                "login_failed:invalid_password",
                "login_failed:invalid_password",
                "login_failed:account_locked",
            ]
        );

        fx.clock.advance(Duration::minutes(31));
        let outcome = fx.auth.login("ada", "s3cret", &client()).await.unwrap();
        assert!(!outcome.must_change_password);
        assert!(!fx.auth.lockout().check_lockout("ada").await.unwrap().is_locked);
        fx.stop().await;
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let fx = Fixture::new(plain_hasher()).await;
        let _ = fx.provision("ada", false).await;

        for _ in 0..2 {
            let _ = fx.auth.login("ada", "wrong", &client()).await.unwrap_err();
        }
        let _ = fx.auth.login("ada", "s3cret", &client()).await.unwrap();

        // two more failures stay under the threshold of three
        for _ in 0..2 {
            let _ = fx.auth.login("ada", "wrong", &client()).await.unwrap_err();
        }
        assert!(!fx.auth.lockout().check_lockout("ada").await.unwrap().is_locked);
        fx.stop().await;
    }

    #[tokio::test]
    async fn logout_terminates_and_audits() {
        let fx = Fixture::new(plain_hasher()).await;
        let _ = fx.provision("ada", false).await;
        let outcome = fx.auth.login("ada", "s3cret", &client()).await.unwrap();
        let token = outcome.session.token.as_str();

        assert!(fx.auth.logout(token, &client()).await.unwrap());
        assert!(!fx.auth.logout(token, &client()).await.unwrap());
        assert!(fx.auth.sessions().validate_session(token).await.is_none());

        let _ = fx.reasons().await;
        let events = fx.auth.audit().recent(1).await.unwrap();
        assert_eq!(events[0].event_type, "logout");
        assert_eq!(events[0].username.as_deref(), Some("ada"));
        fx.stop().await;
    }

    #[tokio::test]
    async fn revoke_single_and_all() {
        let fx = Fixture::new(plain_hasher()).await;
        let ada = fx.provision("ada", false).await;
        let first = fx.auth.login("ada", "s3cret", &client()).await.unwrap();
        fx.clock.advance(Duration::seconds(1));
        let _ = fx.auth.login("ada", "s3cret", &client()).await.unwrap();
        fx.clock.advance(Duration::seconds(1));
        let _ = fx.auth.login("ada", "s3cret", &client()).await.unwrap();

        assert!(
            fx.auth
                .revoke_session(&first.session.id, &ada.id)
                .await
                .unwrap()
        );
        assert_eq!(fx.auth.revoke_all(&ada.id).await.unwrap(), 2);
        assert_eq!(
            fx.reasons().await,
            vec!["login", "login", "login", "session_revoked", "sessions_revoked_all"]
        );
        fx.stop().await;
    }
}
