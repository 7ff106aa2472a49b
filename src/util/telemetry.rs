//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// Initialize tracing. Users can install their own subscriber; this helper
/// installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    init_tracing_with(None);
}

/// Initialize tracing with `directive` (e.g. `debug` or `signerd=trace`)
/// overriding `RUST_LOG`.
pub fn init_tracing_with(directive: Option<&str>) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = directive.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        EnvFilter::new,
    );
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
