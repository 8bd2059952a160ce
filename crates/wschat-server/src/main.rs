//! # wschat
//!
//! Group chat relay over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! wschat
//!
//! # Run with custom config, logging to a file
//! wschat -c /etc/wschat/wschat.toml -l /var/log/wschat.log -L info
//!
//! # Run with environment variables
//! WSCHAT_PORT=8080 WSCHAT_HOST=0.0.0.0 wschat
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "wschat")]
#[command(version)]
#[command(about = "Group chat relay over WebSocket")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file path (`-` for stderr)
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Logging level
    #[arg(short = 'L', long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Error,
    #[value(alias = "warning")]
    Warn,
    #[value(alias = "notice")]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Install the subscriber. `RUST_LOG` wins over `--log-level`.
fn init_logging(level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let file = match log_file.filter(|p| p.as_os_str() != "-") {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(file)
        }
        None => None,
    };

    let (file_layer, stderr_layer) = match file {
        Some(file) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            ),
            None,
        ),
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_level, cli.log_file.as_deref())?;

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    tracing::info!("Starting wschat on {}:{}", config.host, config.port);

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
