//! snicert - main entry point
//!
//! Serves per-SNI certificates on one HTTPS listener and keeps them renewed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use snicert::{App, FileRecordStore, RecordStore};
use snicert_common::observability::init_tracing;
use snicert_config::{lint_config, Config};

/// snicert - TLS certificates per SNI name, issued and renewed automatically
#[derive(Parser, Debug)]
#[command(name = "snicert")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "SNICERT_CONFIG")]
    config: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long = "json-logs")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test {
        /// Configuration file to test
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
    /// Run the certificate service (default)
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    init_tracing(level, cli.json_logs);

    if cli.test {
        return test_config(cli.config.as_deref());
    }

    match cli.command {
        Some(Commands::Test { config }) => test_config(config.as_deref().or(cli.config.as_deref())),
        Some(Commands::Run { config }) => run_server(config.or(cli.config).as_deref()),
        None => run_server(cli.config.as_deref()),
    }
}

fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => {
            info!(path = %path, "Loading configuration file");
            Config::from_file(path).context("Failed to load configuration file")
        }
        None => {
            info!("No configuration specified, using embedded default configuration");
            Config::default_embedded().context("Failed to load embedded configuration")
        }
    }
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Configuration validation failed")?;

    let lint = lint_config(&config);
    for warning in &lint.warnings {
        warn!("{}", warning);
    }

    let storage = &config.storage.path;
    let records = if storage.exists() {
        FileRecordStore::open_read_only(storage)
            .context("Failed to read certificate store")?
            .len()?
    } else {
        info!(path = %storage.display(), "Certificate store does not exist yet");
        0
    };

    info!("Configuration test successful:");
    info!("  - HTTPS listener on {}", config.server.listen);
    info!("  - HTTP-01 listener on {}", config.acme.challenge_listen);
    info!("  - {} stored certificate(s)", records);
    info!(
        "  - renewal {} day(s) before expiry, checked every {} hour(s)",
        config.renewal.threshold_days, config.renewal.check_interval_hours
    );

    println!(
        "snicert: configuration file {} test is successful",
        config_path.unwrap_or("(embedded)")
    );
    Ok(())
}

/// Run the certificate service until SIGINT or SIGTERM
fn run_server(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Configuration validation failed")?;
    for warning in lint_config(&config).warnings {
        warn!("{}", warning);
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(async move {
        let app = App::build(config)?;
        let shutdown = CancellationToken::new();

        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                wait_for_signal().await;
                shutdown.cancel();
            }
        });

        app.run(shutdown).await
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl-C");
}
