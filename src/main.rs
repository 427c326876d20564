//! Recap - Transparent Execution Cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use recap::artifact::ExitStatus;
use recap::cli::{Cli, Commands};
use recap::config::ConfigManager;
use recap::error::RecapResult;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            exit_code(e.exit_code())
        }
    }
}

async fn run() -> RecapResult<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info (cache decisions), 2+ = debug.
    // Diagnostics go to stderr; stdout belongs to the wrapped command.
    let filter = match cli.verbose {
        0 => EnvFilter::new("recap=warn"),
        1 => EnvFilter::new("recap=info"),
        _ => EnvFilter::new("recap=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = manager.load().await?;

    // Dispatch to command
    match cli.command {
        Commands::Run(args) => {
            let status = recap::cli::commands::run(args, &config).await?;
            Ok(status_code(status))
        }
        Commands::Trace(args) => {
            let status = recap::cli::commands::trace(args, &config).await?;
            Ok(status_code(status))
        }
        Commands::Cache(args) => {
            recap::cli::commands::cache(args, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(args) => {
            recap::cli::commands::config(args, &manager, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Surface the wrapped command's status as our own exit code, so the
/// pair `recap run -- cmd` composes like `cmd` alone would.
fn status_code(status: ExitStatus) -> ExitCode {
    exit_code(status.code())
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}
