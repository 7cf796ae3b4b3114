//! mcphub binary: load configuration, set up logging, run the hub on
//! standard streams.
//!
//! Exit code 0 on a requested shutdown (signal, client EOF, orphaned
//! process), 1 on startup or transport failure.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use mcphub::config::{HubConfig, LoggingConfig};
use mcphub::hub::Hub;

/// Model Context Protocol hub.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the hub configuration file
    #[arg(short, long, env = "MCPHUB_CONFIG", default_value = "hub.json")]
    config: PathBuf,

    /// Force log output to stderr regardless of configuration
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match HubConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not up yet.
            eprintln!("mcphub: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(config.logging.as_ref(), cli.debug) {
        eprintln!("mcphub: cannot initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let hub = match Hub::from_config(config) {
        Ok(hub) => hub,
        Err(e) => {
            error!(error = %e, "failed to build hub");
            return ExitCode::FAILURE;
        }
    };

    match hub.run().await {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) if e.is_shutdown() => {
            info!(reason = %e, "graceful shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "hub failed");
            ExitCode::FAILURE
        }
    }
}

/// Wire tracing to the configured destinations.
///
/// stdout is the MCP wire and must never see a log line; logs go to the
/// configured file, to stderr, or both.
fn init_logging(logging: Option<&LoggingConfig>, force_stderr: bool) -> std::io::Result<()> {
    let level = logging
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info")
        .to_string();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match logging.and_then(|l| l.file.as_ref()) {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    let use_stderr = force_stderr
        || logging.map(|l| l.with_stderr).unwrap_or(false)
        || logging.and_then(|l| l.file.as_ref()).is_none();
    let stderr_layer = use_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}
