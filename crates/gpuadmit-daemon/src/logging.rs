//! Global tracing subscriber

use gpuadmit_core::{LogFormat, LoggingConfig};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Configured level, INFO when it does not parse
fn default_level(level: &str) -> LevelFilter {
    level.trim().parse::<LevelFilter>().unwrap_or(LevelFilter::INFO)
}

/// Filter from `RUST_LOG`, falling back to the configured level
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level(level).into())
        .from_env_lossy()
}

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(&config.level);

    match config.format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(filter)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init()?,
    }

    Ok(())
}
