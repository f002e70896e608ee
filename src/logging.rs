//! Categorized, level-filtered logging.
//!
//! Redesign of the source pattern "global thread-local logger with runtime
//! category lookup" (spec §9): rather than a bespoke socket-backed client,
//! categories map onto `tracing` targets and the fast path is `tracing`'s
//! own compiled-in level check — a single read, no lock.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber. Idempotent — safe to call more than
/// once (e.g. once from `main`, once from a test harness).
pub fn init() {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
    });
}

/// Debug-level log under a named category (tracing target).
#[macro_export]
macro_rules! log_debug {
    ($category:expr, $($arg:tt)*) => {
        tracing::debug!(target: $category, $($arg)*);
    };
}

#[macro_export]
macro_rules! log_info {
    ($category:expr, $($arg:tt)*) => {
        tracing::info!(target: $category, $($arg)*);
    };
}

#[macro_export]
macro_rules! log_warn {
    ($category:expr, $($arg:tt)*) => {
        tracing::warn!(target: $category, $($arg)*);
    };
}

#[macro_export]
macro_rules! log_error {
    ($category:expr, $($arg:tt)*) => {
        tracing::error!(target: $category, $($arg)*);
    };
}
