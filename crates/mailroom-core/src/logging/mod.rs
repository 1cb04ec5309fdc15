//! Structured logging with `tracing`.
//!
//! Every crate logs through `tracing` macros with structured fields
//! (`user_id`, `token_prefix`, `attempt`, …). The binary installs a single
//! stderr subscriber at startup with [`init_subscriber`]; tests install a
//! thread-local capturing subscriber with [`capture_logs`].
//!
//! Logs are never persisted to the application database: the store has
//! exactly one writer and it belongs to the write queue.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` wins over `level` when set. With `json` the output is one
/// JSON object per line, otherwise the compact human format. Subsequent
/// calls are no-ops.
pub fn init_subscriber(level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails if a global subscriber is already installed
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_is_idempotent() {
        init_subscriber("warn", false);
        init_subscriber("debug", true);
    }
}
