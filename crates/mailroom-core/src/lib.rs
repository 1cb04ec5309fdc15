//! # mailroom-core
//!
//! Foundation types shared by every Mailroom crate:
//!
//! - **Branded IDs**: `UserId`, `SessionId`, `AuthEventId` as prefixed UUID v7 newtypes
//! - **Clock**: injectable wall-clock capability with a manual test clock
//! - **Timestamps**: the text encoding used for every stored instant
//! - **Retry**: exponential backoff math used by the write façade
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod clock;
pub mod ids;
pub mod logging;
pub mod retry;

pub use clock::{Clock, ManualClock, SystemClock, format_timestamp, parse_timestamp};
pub use ids::{AuthEventId, SessionId, UserId};
