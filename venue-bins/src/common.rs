//! Shared CLI plumbing for the venue's two binaries.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Flags common to both the exchange server and the broker daemon.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CommonArgs {
    /// Path to the TOML config file (without extension), e.g. "config/exchange".
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level, used when `RUST_LOG` is unset.
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

/// Initializes structured logging, deferring to `RUST_LOG` when present.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    Ok(())
}
