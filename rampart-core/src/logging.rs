use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install a human-readable `tracing` subscriber driven by `RUST_LOG`
/// (default `info`). Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let _ = fmt().with_env_filter(env_filter()).with_target(true).try_init();
}

/// Same as [`init_tracing`] but emits one JSON object per event.
pub fn init_tracing_json() {
    let _ = fmt()
        .json()
        .with_env_filter(env_filter())
        .with_current_span(true)
        .try_init();
}
