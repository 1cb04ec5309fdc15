//! # mailroom-settings
//!
//! Configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`MailroomSettings::default()`]
//! 2. **Settings file**: `~/.mailroom/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `MAILROOM_*` overrides (highest priority)
//!
//! There is no process-wide settings instance: the binary loads once and
//! hands the relevant sections to each component's `from_settings`
//! constructor.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
