use tracing_subscriber::EnvFilter;

/// Initialize the process-wide tracing subscriber. Honors `RUST_LOG`,
/// defaulting to `corral=info`. The embedding API layer may install its own
/// subscriber instead; this is a convenience for standalone use and tests.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("corral=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
