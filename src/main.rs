//! stepwise - declarative end-to-end test orchestrator
//!
//! Runs YAML test scenarios made of shell steps against a live environment,
//! always running their cleanup steps.

use std::path::PathBuf;

use clap::Parser;
use commands::Commands;
use stepwise::common::config::Config;
use stepwise::common::logging;
use stepwise::{cli, commands};

#[derive(Parser)]
#[command(name = "stepwise", about = "Declarative end-to-end test orchestrator")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Run { verbose: true, .. });
    let _log_guard = logging::init_cli(verbose, cli.log_file.as_deref());

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };

    let result = match config {
        Ok(config) => cli::dispatch(cli.command, &config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
