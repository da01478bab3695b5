//! CLI entry point for the video converter daemon
//!
//! Parses command line arguments, loads and validates the configuration,
//! wires shutdown signals, and runs the daemon.

use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use video_converter_daemon::{Config, Daemon};

/// Video converter daemon - discovers video files and converts them to .m4v
#[derive(Parser, Debug)]
#[command(name = "video-converter-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Discover and report candidates without converting anything
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Validate the configuration file and exit
    #[arg(long, default_value = "false")]
    validate_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if args.validate_config {
        println!("Configuration OK: {}", args.config.display());
        return ExitCode::SUCCESS;
    }

    init_logger(&config.daemon.log_level);

    let (daemon, shutdown) = match Daemon::new(config, args.dry_run) {
        Ok(parts) => parts,
        Err(e) => {
            error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        shutdown.signal();
    });

    daemon.run().await;
    ExitCode::SUCCESS
}

/// Initialize env_logger at the configured level; RUST_LOG still wins when
/// set, matching the usual debugging workflow.
fn init_logger(level: &str) {
    let filter = level.parse().unwrap_or(log::LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(filter)
        .parse_default_env()
        .init();
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
