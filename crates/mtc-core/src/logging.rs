use tracing_subscriber::EnvFilter;

/// Installs the process-wide fmt subscriber. `RUST_LOG` wins over
/// `default_directive`; a second call is a no-op.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
