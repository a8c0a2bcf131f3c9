//! Logging init: structured lines on stdout, text or JSON.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the process subscriber. `RUST_LOG` overrides the default `info` filter.
/// Returns Err if a subscriber was already set.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stdout)
        .with_target(false);

    match format {
        LogFormat::Text => builder
            .with_ansi(false)
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?,
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?,
    }
    Ok(())
}
