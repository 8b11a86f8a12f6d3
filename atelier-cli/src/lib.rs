use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Route human-readable logs to stderr; stdout belongs to the JSON result
/// contract.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
