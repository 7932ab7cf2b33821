use tracing_subscriber::EnvFilter;

/// Structured logging bootstrap: an `EnvFilter`-driven subscriber, targets
/// disabled so operator-facing lines read as plain messages, crate version
/// logged on boot.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskforge=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    let version = env!("CARGO_PKG_VERSION");
    tracing::info!("Version {version} started up.");
}
