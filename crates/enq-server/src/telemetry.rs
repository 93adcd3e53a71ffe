//! Process-wide tracing setup, shared by both binaries.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a global tracing subscriber that reads `RUST_LOG` (falling back
/// to `info`) and writes compact, human-readable lines to stderr.
///
/// Call once at process start, before anything else logs.
pub fn init(app_env: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(true);

    if app_env == "local" {
        builder.init();
    } else {
        builder.json().init();
    }
}
