//! Wall-clock capability and the stored timestamp encoding.
//!
//! Every instant that reaches the store is written as RFC 3339 UTC text with
//! millisecond precision and a `Z` suffix. That form sorts lexicographically
//! in time order, so SQL comparisons such as `expires_at > ?` work on the raw
//! column, and it matches `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` used in the
//! schema defaults.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Cloning shares the same instant.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Start the clock at the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Encode an instant the way it is stored.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Decode a stored timestamp.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    }

    #[test]
    fn format_has_millis_and_z() {
        assert_eq!(format_timestamp(fixed()), "2026-10-18T12:00:00.000Z");
    }

    #[test]
    fn parse_inverts_format() {
        let at = fixed() + Duration::milliseconds(1234);
        assert_eq!(parse_timestamp(&format_timestamp(at)).unwrap(), at);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn encoding_sorts_in_time_order() {
        let earlier = format_timestamp(fixed() + Duration::milliseconds(999));
        let later = format_timestamp(fixed() + Duration::seconds(10));
        assert!(earlier < later);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(fixed());
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), fixed() + Duration::seconds(30));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(fixed());
        let other = clock.clone();
        clock.set(fixed() + Duration::hours(1));
        assert_eq!(other.now(), fixed() + Duration::hours(1));
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let delta = Utc::now() - SystemClock.now();
        assert!(delta.num_seconds().abs() < 5);
    }
}
