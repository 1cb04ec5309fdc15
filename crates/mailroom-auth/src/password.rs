//! Pluggable password hashing.
//!
//! No algorithm ships with this crate. The application supplies one (bcrypt,
//! argon2, …) behind this trait; the auth flow only ever hashes new
//! passwords and verifies presented ones against stored hashes.

use crate::errors::Result;

/// Hash and verify capability.
#[cfg_attr(test, mockall::automock)]
pub trait PasswordHasher: Send + Sync {
    /// Hash a new password for storage.
    fn hash(&self, password: &str) -> Result<String>;

    /// Whether `password` matches `hash`. A malformed hash is a mismatch.
    fn verify(&self, password: &str, hash: &str) -> bool;
}
