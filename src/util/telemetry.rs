//! Telemetry helpers for structured logging.

use tracing_subscriber::EnvFilter;

/// Default filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "push_dispatch=info";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`]. Does nothing if a global subscriber already exists.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
