//! Tracing subscriber setup.
//!
//! Logs go to stderr so that CLI output on stdout stays machine-readable.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber.
///
/// `level` overrides `RUST_LOG`; when neither is set the filter defaults to
/// `info`. Calling this twice returns an error rather than panicking.
pub fn init_logging(level: Option<&str>) -> Result<()> {
    let from_env = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter_str = level.unwrap_or(&from_env);

    let env_filter =
        EnvFilter::try_new(filter_str).map_err(|e| anyhow!("invalid log filter: {}", e))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {}", e))?;

    Ok(())
}
