//! # mailroom-auth
//!
//! Sessions and account lockout on top of the single-writer store.
//!
//! - [`SessionManager`]: create, validate, renew, terminate and sweep
//!   sessions, capping live sessions per user by evicting the oldest
//! - [`LockoutTracker`]: failed-login counting and time-boxed lockout
//! - [`AuthEventLog`]: fire-and-forget audit trail
//! - [`UserDirectory`]: credential lookup and user provisioning
//! - [`Authenticator`]: the login / logout flow composing all of the above
//!
//! Every mutation goes through the [`mailroom_store::RetryingWriter`];
//! lookups use short-lived read connections. Count-then-evict in
//! [`SessionManager::create_session`] and read-then-increment in
//! [`LockoutTracker::record_failure`] are not atomic: concurrent calls can
//! briefly overshoot the session cap or drop an increment. The next create
//! or sweep brings a user back under the cap.
//!
//! Time always comes from an injected [`mailroom_core::Clock`].

#![deny(unsafe_code)]

pub mod audit;
pub mod authenticator;
pub mod errors;
pub mod lockout;
pub mod password;
pub mod sessions;
pub mod token;
pub mod types;
pub mod users;

mod rows;

pub use audit::{AuthEvent, AuthEventKind, AuthEventLog, StoredAuthEvent};
pub use authenticator::{Authenticator, LoginOutcome};
pub use errors::{AuthError, Result};
pub use lockout::{FailureOutcome, LockoutPolicy, LockoutStatus, LockoutTracker};
pub use password::PasswordHasher;
pub use sessions::{SessionConfig, SessionManager};
pub use token::SessionToken;
pub use types::{ClientInfo, Credentials, NewUser, Principal, Role, Session, SessionState};
pub use users::UserDirectory;
