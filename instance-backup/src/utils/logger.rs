//! Logging setup for the command line tool.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter for `level`; `RUST_LOG` wins when it is set and valid, and an
/// unparseable level falls back to `info`.
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Colors are off when output is not meant for a terminal.
pub fn init(level: &str, ansi: bool) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_target(false).with_ansi(ansi))
        .try_init()?;

    Ok(())
}
