//! Branded ID newtypes.
//!
//! Each persisted entity gets its own ID type so a session ID can never be
//! passed where a user ID is expected. Fresh IDs are a short type prefix
//! followed by a UUID v7, e.g. `sess_01928c3e-…`, which keeps them
//! time-ordered and recognizable in logs and audit rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Prefix placed in front of generated IDs.
            pub const PREFIX: &'static str = $prefix;

            /// Create a new random ID (`<prefix>_<uuid v7>`).
            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing string value (e.g. read back from the store).
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of a user account (the session principal).
    UserId, "usr"
}

branded_id! {
    /// Identifier of a login session row.
    SessionId, "sess"
}

branded_id! {
    /// Identifier of an authentication audit event.
    AuthEventId, "aev"
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid_part(id: &str) -> Uuid {
        let (_, rest) = id.split_once('_').expect("prefixed id");
        Uuid::parse_str(rest).expect("valid uuid")
    }

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(UserId::new().starts_with("usr_"));
        assert!(SessionId::new().starts_with("sess_"));
        assert!(AuthEventId::new().starts_with("aev_"));
    }

    #[test]
    fn generated_ids_are_uuid_v7() {
        let id = SessionId::new();
        assert_eq!(
            uuid_part(id.as_str()).get_version(),
            Some(uuid::Version::SortRand)
        );
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn later_ids_sort_after_earlier_ones() {
        let first = UserId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = UserId::new();
        assert!(first < second);
    }

    #[test]
    fn from_str_ref() {
        let id = UserId::from("usr_custom");
        assert_eq!(id.as_str(), "usr_custom");
    }

    #[test]
    fn deref_and_display() {
        let id = SessionId::from("sess_x");
        let s: &str = &id;
        assert_eq!(s, "sess_x");
        assert_eq!(format!("{id}"), "sess_x");
    }

    #[test]
    fn into_string() {
        let s: String = AuthEventId::from("aev_1").into();
        assert_eq!(s, "aev_1");
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::from("usr_42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"usr_42\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
