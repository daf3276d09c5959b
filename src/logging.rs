//! Tracing setup for the `ui-trail` binary.
//!
//! Diagnostics go to stderr so `--json` output on stdout stays clean. The
//! dataset itself never depends on the log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "ui_trail=info";

/// Initialize the global subscriber.
///
/// Reads `RUST_LOG`, e.g. `RUST_LOG=ui_trail=debug ui-trail run --task …`.
/// Output: stderr, compact format. Calling it twice is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
