//! Opaque bearer tokens.
//!
//! 32 bytes from the thread-local CSPRNG, URL-safe base64 without padding
//! (43 characters). Uniqueness is backstopped by the `UNIQUE` constraint on
//! `sessions.token`. `Debug` shows only a short prefix so tokens never end up
//! whole in logs.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

const TOKEN_BYTES: usize = 32;
const PREFIX_LEN: usize = 8;

/// A session bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Wrap a token presented by a client or read from the store.
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }

    /// The full token. Only for the wire and the store.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters, safe to log.
    pub fn prefix(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(PREFIX_LEN)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.prefix())
    }
}

impl From<&str> for SessionToken {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
