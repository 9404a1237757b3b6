//! Development-time tracing.
//!
//! Diagnostics only: controlled by `RUST_LOG`, written to stderr, never
//! persisted. The task result printed on stdout is unaffected by it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// # Example
/// ```bash
/// RUST_LOG=phasekit=debug phasekit run --goal "landing page with a contact form"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
