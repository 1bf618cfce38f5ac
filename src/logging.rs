//! Logging setup for the `activity` binary.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `level`. Output goes to stderr so that
/// command summaries on stdout stay machine-readable.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // A subscriber may already be installed (tests, embedding binaries).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
