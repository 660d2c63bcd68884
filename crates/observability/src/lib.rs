//! Process-wide tracing setup shared by binaries and tests.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber: JSON lines on stdout, filtered
/// through `RUST_LOG` with an `info` default.
///
/// Safe to call multiple times; only the first call installs anything.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("tracing initialized");
    }
}
