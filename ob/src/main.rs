//! orbatch - opt RPC batch runner
//!
//! CLI entry point: resolves configuration, sets up logging, and hands the
//! run to the driver.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use orbatch::cli::Cli;
use orbatch::config::Config;
use orbatch::driver::RunDriver;

/// Exit code for a script that could not be loaded, or output that could not be written
const EXIT_FAILURE: u8 = 1;

/// Exit code for a script with nothing to run
const EXIT_USAGE: u8 = 2;

/// Exit code after a second Ctrl-C, as a shell reports SIGINT
const EXIT_INTERRUPTED: i32 = 130;

fn parse_level(level: Option<&str>) -> tracing::Level {
    match level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orbatch")
        .join("logs");

    // Trace output may be going to stdout, so logs never do
    match fs::create_dir_all(&log_dir).and_then(|_| fs::File::create(log_dir.join("orbatch.log"))) {
        Ok(log_file) => tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init(),
        Err(e) => {
            eprintln!("Warning: Cannot create log file in {}: {}", log_dir.display(), e);
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Set `flag` on the first Ctrl-C, exit on the second
///
/// The driver checks the flag between iterations; a script stuck in a long
/// `-loop` or a slow read only stops on the second Ctrl-C.
fn watch_interrupt(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing current iteration");
        eprintln!("Interrupted, stopping after the current iteration (Ctrl-C again to abort)");
        flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt received, aborting");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let run_config = cli.into_run_config(&config);
    debug!(?run_config, "main: resolved run configuration");

    let mut out = run_config
        .output
        .open()
        .context(format!("Failed to open output {:?}", run_config.output))?;

    let interrupt = Arc::new(AtomicBool::new(false));
    watch_interrupt(interrupt.clone());

    let driver = RunDriver::new(run_config).with_interrupt(interrupt);
    match driver.execute(&mut *out).await {
        Ok(report) => {
            info!(
                outer = report.outer_completed,
                requests = report.stats.requests,
                check_failures = report.stats.check_failures,
                "orbatch finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_usage() => {
            eprintln!("{} {}", "error:".red().bold(), e);
            eprintln!("Run with --help for the command file syntax");
            Ok(ExitCode::from(EXIT_USAGE))
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            Ok(ExitCode::from(EXIT_FAILURE))
        }
    }
}
