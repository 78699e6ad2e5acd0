use tracing_subscriber::{fmt, EnvFilter};

/// Build the log filter for a sync run.
///
/// `RUST_LOG` wins over `LOG_LEVEL`; `default_level` applies when neither
/// holds a valid directive.
pub fn build_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env("RUST_LOG")
        .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
        .unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global fmt subscriber. A second call is a no-op.
pub fn init_tracing(default_level: &str) {
    let _ = fmt()
        .with_env_filter(build_filter(default_level))
        .with_target(true)
        .try_init();
}
